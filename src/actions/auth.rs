use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};

use crate::auth::{AuthUser, JwtService};
use crate::users::{CreateUserRequest, UserRole};
use crate::users_repo::{UsersRepository, verify_password_hash};
use crate::web::AppState;

use super::{
    DataResponse, json_error,
    views::{
        ChangePasswordRequest, LoginRequest, LoginResponse, MIN_PASSWORD_LENGTH, RegisterRequest,
        UserView,
    },
};

/// POST /auth/register
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    if let Err(message) = payload.validate() {
        return json_error(StatusCode::BAD_REQUEST, &message).into_response();
    }

    let users_repo = UsersRepository::new(state.pool.clone());

    match users_repo.get_by_email(&payload.email).await {
        Ok(Some(_)) => {
            return json_error(StatusCode::CONFLICT, "User with this email already exists")
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "Failed to check existing user");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create user")
                .into_response();
        }
    }

    let request = CreateUserRequest {
        first_name: payload.first_name,
        last_name: payload.last_name,
        email: payload.email,
        password: payload.password,
        role: payload.role.unwrap_or(UserRole::Customer),
        phone: payload.phone,
    };

    let user = match users_repo.create_user(&request).await {
        Ok(user) => user,
        Err(e) => {
            error!(error = %e, "Failed to create user");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create user")
                .into_response();
        }
    };

    info!(user_id = %user.id, role = user.role.as_str(), "Registered user");

    match JwtService::new(&state.config.jwt_secret).generate_token(&user) {
        Ok(token) => (
            StatusCode::CREATED,
            Json(DataResponse {
                data: LoginResponse {
                    token,
                    user: user.into(),
                },
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to generate token");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate token")
                .into_response()
        }
    }
}

/// POST /auth/login
pub async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let users_repo = UsersRepository::new(state.pool.clone());

    match users_repo
        .verify_password(&payload.email, &payload.password)
        .await
    {
        Ok(Some(user)) => match JwtService::new(&state.config.jwt_secret).generate_token(&user) {
            Ok(token) => Json(DataResponse {
                data: LoginResponse {
                    token,
                    user: user.into(),
                },
            })
            .into_response(),
            Err(e) => {
                error!(error = %e, "Failed to generate token");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate token")
                    .into_response()
            }
        },
        Ok(None) => {
            json_error(StatusCode::UNAUTHORIZED, "Invalid email or password").into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to verify password");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response()
        }
    }
}

/// GET /auth/me
pub async fn get_current_user(auth_user: AuthUser) -> impl IntoResponse {
    Json(DataResponse {
        data: UserView::from(auth_user.0),
    })
}

/// PUT /auth/password
pub async fn change_password(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> impl IntoResponse {
    let user = auth_user.0;

    match verify_password_hash(&user.password_hash, &payload.current_password) {
        Ok(true) => {}
        Ok(false) => {
            return json_error(StatusCode::UNAUTHORIZED, "Current password is incorrect")
                .into_response();
        }
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to verify password");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to change password")
                .into_response();
        }
    }

    if payload.new_password.len() < MIN_PASSWORD_LENGTH {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            ),
        )
        .into_response();
    }

    let users_repo = UsersRepository::new(state.pool.clone());
    match users_repo
        .update_password(user.id, &payload.new_password)
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "User not found").into_response(),
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to update password");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to change password")
                .into_response()
        }
    }
}
