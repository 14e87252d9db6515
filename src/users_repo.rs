use anyhow::Result;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use diesel::prelude::*;
use uuid::Uuid;

use crate::users::{
    CreateUserRequest, NewUser, UpdateUser, User, UserModel, UserRole, normalize_email,
};
use crate::web::PgPool;

#[derive(Clone)]
pub struct UsersRepository {
    pool: PgPool,
}

impl UsersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get user by ID
    pub async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let user: Option<UserModel> = dsl::users
                .filter(dsl::id.eq(user_id))
                .select(UserModel::as_select())
                .first(&mut conn)
                .optional()?;

            Ok::<Option<UserModel>, anyhow::Error>(user)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Get user by email (case-insensitive, emails are stored lower-cased)
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let email = normalize_email(email);
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let user: Option<UserModel> = dsl::users
                .filter(dsl::email.eq(&email))
                .select(UserModel::as_select())
                .first(&mut conn)
                .optional()?;

            Ok::<Option<UserModel>, anyhow::Error>(user)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// List users, newest first, optionally restricted to one role (admin only)
    pub async fn list(&self, role: Option<UserRole>, limit: i64) -> Result<Vec<User>> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = dsl::users.select(UserModel::as_select()).into_boxed();
            if let Some(role) = role {
                query = query.filter(dsl::role.eq(role));
            }

            let users: Vec<UserModel> = query
                .order_by(dsl::created_at.desc())
                .limit(limit)
                .load(&mut conn)?;

            Ok::<Vec<UserModel>, anyhow::Error>(users)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Create a new user with a hashed password
    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<User> {
        use crate::schema::users::dsl;

        let new_user = NewUser {
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            email: normalize_email(&request.email),
            password_hash: hash_password(&request.password)?,
            role: request.role,
            phone: request.phone.clone(),
        };

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: UserModel = diesel::insert_into(dsl::users)
                .values(&new_user)
                .returning(UserModel::as_returning())
                .get_result(&mut conn)?;

            Ok::<UserModel, anyhow::Error>(inserted)
        })
        .await??;

        Ok(result.into())
    }

    /// Apply an admin update; returns None when the user does not exist
    pub async fn update_user(&self, user_id: Uuid, update: UpdateUser) -> Result<Option<User>> {
        use crate::schema::users;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<UserModel> = diesel::update(users::table)
                .filter(users::id.eq(user_id))
                .set((&update, users::updated_at.eq(diesel::dsl::now)))
                .returning(UserModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<UserModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    pub async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<bool> {
        let update = UpdateUser {
            is_active: Some(is_active),
            ..Default::default()
        };
        Ok(self.update_user(user_id, update).await?.is_some())
    }

    /// Delete a user. Fails if rentals or withdrawals still reference them.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        use crate::schema::users::dsl;

        let pool = self.pool.clone();
        let deleted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let deleted_count = diesel::delete(dsl::users.filter(dsl::id.eq(user_id)))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(deleted_count)
        })
        .await??;

        Ok(deleted > 0)
    }

    /// Verify a user's password. Inactive accounts never authenticate.
    pub async fn verify_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        match self.get_by_email(email).await? {
            Some(user) if user.is_active && verify_password_hash(&user.password_hash, password)? => {
                Ok(Some(user))
            }
            _ => Ok(None),
        }
    }

    pub async fn update_password(&self, user_id: Uuid, new_password: &str) -> Result<bool> {
        use crate::schema::users;

        let password_hash = hash_password(new_password)?;
        let pool = self.pool.clone();
        let updated = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count = diesel::update(users::table)
                .filter(users::id.eq(user_id))
                .set((
                    users::password_hash.eq(password_hash),
                    users::updated_at.eq(diesel::dsl::now),
                ))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(count)
        })
        .await??;

        Ok(updated > 0)
    }

    /// Number of users per role, for the admin dashboard
    pub async fn count_by_role(&self) -> Result<Vec<(UserRole, i64)>> {
        use crate::schema::users::dsl;
        use diesel::dsl::count_star;

        let pool = self.pool.clone();
        let counts = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let counts: Vec<(UserRole, i64)> = dsl::users
                .group_by(dsl::role)
                .select((dsl::role, count_star()))
                .load(&mut conn)?;

            Ok::<Vec<(UserRole, i64)>, anyhow::Error>(counts)
        })
        .await??;

        Ok(counts)
    }
}

/// Hash a password with Argon2id and a random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(password_hash.to_string())
}

/// Verify password against hash
pub fn verify_password_hash(hash: &str, password: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
