use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser};
use crate::users::{UpdateUser, UserRole};
use crate::users_repo::UsersRepository;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, json_error, page_limit, views::UserView};

#[derive(Debug, Deserialize)]
pub struct UserQueryParams {
    pub role: Option<UserRole>,
    pub limit: Option<i64>,
}

/// Whether an error came from a foreign key still pointing at the row
pub(crate) fn is_foreign_key_violation(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<DieselError>(),
        Some(DieselError::DatabaseError(
            DatabaseErrorKind::ForeignKeyViolation,
            _
        ))
    )
}

/// Whether an error came from a unique index
pub(crate) fn is_unique_violation(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<DieselError>(),
        Some(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
    )
}

/// GET /admin/users
pub async fn get_all_users(
    _admin_user: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<UserQueryParams>,
) -> impl IntoResponse {
    let users_repo = UsersRepository::new(state.pool);

    match users_repo.list(params.role, page_limit(params.limit)).await {
        Ok(users) => Json(DataListResponse {
            data: users.into_iter().map(UserView::from).collect(),
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to get users");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get users").into_response()
        }
    }
}

/// GET /users/{id}
pub async fn get_user_by_id(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    if !auth_user.0.is_admin() && auth_user.0.id != user_id {
        return json_error(StatusCode::FORBIDDEN, "Insufficient permissions").into_response();
    }

    let users_repo = UsersRepository::new(state.pool);
    match users_repo.get_by_id(user_id).await {
        Ok(Some(user)) => Json(DataResponse {
            data: UserView::from(user),
        })
        .into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "User not found").into_response(),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to get user");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get user").into_response()
        }
    }
}

/// PUT /admin/users/{id}
pub async fn update_user_by_id(
    admin_user: AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUser>,
) -> impl IntoResponse {
    // Admins cannot lock themselves out
    if admin_user.0.id == user_id
        && (payload.is_active == Some(false)
            || payload.role.is_some_and(|role| role != UserRole::Admin))
    {
        return json_error(
            StatusCode::BAD_REQUEST,
            "You cannot deactivate or demote your own account",
        )
        .into_response();
    }

    let users_repo = UsersRepository::new(state.pool);
    match users_repo.update_user(user_id, payload).await {
        Ok(Some(user)) => {
            info!(user_id = %user.id, admin_id = %admin_user.0.id, "Updated user");
            Json(DataResponse {
                data: UserView::from(user),
            })
            .into_response()
        }
        Ok(None) => json_error(StatusCode::NOT_FOUND, "User not found").into_response(),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to update user");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update user").into_response()
        }
    }
}

/// DELETE /admin/users/{id}
pub async fn delete_user_by_id(
    admin_user: AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    if admin_user.0.id == user_id {
        return json_error(StatusCode::BAD_REQUEST, "You cannot delete your own account")
            .into_response();
    }

    let users_repo = UsersRepository::new(state.pool);
    match users_repo.delete_user(user_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "User not found").into_response(),
        Err(e) if is_foreign_key_violation(&e) => json_error(
            StatusCode::CONFLICT,
            "User has rentals or withdrawals; deactivate the account instead",
        )
        .into_response(),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to delete user");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete user").into_response()
        }
    }
}
