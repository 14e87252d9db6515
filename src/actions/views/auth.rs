use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::UserView;
use crate::users::UserRole;

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
pub struct LoginResponse {
    pub token: String,
    pub user: UserView,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    /// customer (default) or owner
    pub role: Option<UserRole>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err("First and last name are required".to_string());
        }
        let email = self.email.trim();
        if email.len() < 3 || !email.contains('@') {
            return Err("A valid email address is required".to_string());
        }
        if self.password.len() < MIN_PASSWORD_LENGTH {
            return Err(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            ));
        }
        if self.role == Some(UserRole::Admin) {
            return Err("Admin accounts cannot be self-registered".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        RegisterRequest {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            password: "correct horse".to_string(),
            role: Some(UserRole::Owner),
            phone: None,
        }
    }

    #[test]
    fn test_register_validation() {
        assert!(request().validate().is_ok());

        let mut admin = request();
        admin.role = Some(UserRole::Admin);
        assert!(admin.validate().is_err());

        let mut short = request();
        short.password = "short".to_string();
        assert!(short.validate().is_err());

        let mut bad_email = request();
        bad_email.email = "not-an-email".to_string();
        assert!(bad_email.validate().is_err());
    }
}
