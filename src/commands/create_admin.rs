use anyhow::{Result, bail};
use tracing::info;

use miride::PgPool;
use miride::actions::views::MIN_PASSWORD_LENGTH;
use miride::users::{CreateUserRequest, UserRole};
use miride::users_repo::UsersRepository;

pub async fn handle_create_admin(
    pool: PgPool,
    email: String,
    password: String,
    first_name: String,
    last_name: String,
) -> Result<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        bail!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        );
    }

    let users_repo = UsersRepository::new(pool);
    if users_repo.get_by_email(&email).await?.is_some() {
        bail!("A user with email {} already exists", email);
    }

    let admin = users_repo
        .create_user(&CreateUserRequest {
            first_name,
            last_name,
            email,
            password,
            role: UserRole::Admin,
            phone: None,
        })
        .await?;

    info!(user_id = %admin.id, email = %admin.email, "Created admin");
    println!("Created admin {} ({})", admin.email, admin.id);
    Ok(())
}
