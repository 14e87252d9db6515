use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::error;
use uuid::Uuid;

use crate::auth::{AdminUser, OwnerUser};
use crate::cars::CarStatus;
use crate::cars_repo::CarsRepository;
use crate::dashboard::{AdminDashboard, OwnerDashboard, complete_counts};
use crate::dashboard_repo::DashboardRepository;
use crate::rentals::RentalStatus;
use crate::rentals_repo::RentalsRepository;
use crate::users::UserRole;
use crate::users_repo::UsersRepository;
use crate::web::{AppState, PgPool};
use crate::withdrawals_repo::WithdrawalsRepository;

use super::{DataResponse, json_error};

const RECENT_RENTALS: i64 = 5;

/// Everything on the owner dashboard, loaded concurrently
pub async fn load_owner_dashboard(pool: PgPool, owner_id: Uuid) -> anyhow::Result<OwnerDashboard> {
    let cars_repo = CarsRepository::new(pool.clone());
    let rentals_repo = RentalsRepository::new(pool.clone());
    let withdrawals_repo = WithdrawalsRepository::new(pool.clone());
    let dashboard_repo = DashboardRepository::new(pool);

    let (car_counts, rental_counts, balance, revenue, recent_rentals) = tokio::try_join!(
        cars_repo.count_by_status(Some(owner_id)),
        rentals_repo.count_by_status(Some(owner_id)),
        withdrawals_repo.balance(owner_id),
        dashboard_repo.revenue_totals(Some(owner_id)),
        rentals_repo.list(Some(owner_id), None, RECENT_RENTALS),
    )?;

    Ok(OwnerDashboard {
        car_count: car_counts.iter().map(|(_, count)| count).sum(),
        rentals_by_status: complete_counts(&RentalStatus::ALL, &rental_counts),
        balance,
        gross_booked_cents: revenue.gross_cents,
        recent_rentals,
    })
}

pub async fn load_admin_dashboard(pool: PgPool) -> anyhow::Result<AdminDashboard> {
    let users_repo = UsersRepository::new(pool.clone());
    let cars_repo = CarsRepository::new(pool.clone());
    let rentals_repo = RentalsRepository::new(pool.clone());
    let dashboard_repo = DashboardRepository::new(pool);

    let (user_counts, car_counts, rental_counts, revenue, total_withdrawn) = tokio::try_join!(
        users_repo.count_by_role(),
        cars_repo.count_by_status(None),
        rentals_repo.count_by_status(None),
        dashboard_repo.revenue_totals(None),
        dashboard_repo.total_withdrawn(),
    )?;

    Ok(AdminDashboard {
        users_by_role: complete_counts(&UserRole::ALL, &user_counts),
        cars_by_status: complete_counts(&CarStatus::ALL, &car_counts),
        rentals_by_status: complete_counts(&RentalStatus::ALL, &rental_counts),
        gross_volume_cents: revenue.gross_cents,
        platform_commission_cents: revenue.commission_cents,
        total_refunded_cents: revenue.refunded_cents,
        total_withdrawn_cents: total_withdrawn,
    })
}

/// GET /owner/dashboard
pub async fn get_owner_dashboard(
    owner: OwnerUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match load_owner_dashboard(state.pool, owner.0.id).await {
        Ok(dashboard) => Json(DataResponse { data: dashboard }).into_response(),
        Err(e) => {
            error!(owner_id = %owner.0.id, error = %e, "Failed to load owner dashboard");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load dashboard")
                .into_response()
        }
    }
}

/// GET /admin/dashboard
pub async fn get_admin_dashboard(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match load_admin_dashboard(state.pool).await {
        Ok(dashboard) => Json(DataResponse { data: dashboard }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to load admin dashboard");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load dashboard")
                .into_response()
        }
    }
}
