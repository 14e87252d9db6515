use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser, OwnerUser};
use crate::cars_repo::CarsRepository;
use crate::rentals::{BookingError, RentalStatus, available_transitions};
use crate::rentals_repo::{BookingRequest, RentalsRepository};
use crate::users::User;
use crate::web::AppState;

use super::views::{
    CheckoutResponse, CreateRentalRequest, RentalDetailView, RentalListQuery, TransitionRequest,
};
use super::{DataListResponse, DataResponse, json_error, page_limit};

fn booking_error_status(e: &BookingError) -> StatusCode {
    match e {
        BookingError::CarNotFound => StatusCode::NOT_FOUND,
        BookingError::CarUnavailable | BookingError::Overlap => StatusCode::CONFLICT,
        BookingError::OwnCar
        | BookingError::EndBeforeStart
        | BookingError::StartInPast
        | BookingError::TooLong
        | BookingError::AmountTooLarge => StatusCode::BAD_REQUEST,
    }
}

/// POST /rentals
pub async fn create_rental(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateRentalRequest>,
) -> impl IntoResponse {
    let request = BookingRequest {
        car_id: payload.car_id,
        customer_id: auth_user.0.id,
        start_date: payload.start_date,
        end_date: payload.end_date,
        customer_note: payload
            .customer_note
            .map(|note| note.trim().to_string())
            .filter(|note| !note.is_empty()),
        today: Utc::now().date_naive(),
    };

    let rentals_repo = RentalsRepository::new(state.pool.clone());
    match rentals_repo
        .create_booking(request, state.config.commission, state.config.currency.clone())
        .await
    {
        Ok(rental) => {
            metrics::counter!("rentals.created").increment(1);
            info!(
                rental_id = %rental.id,
                car_id = %rental.car_id,
                customer_id = %rental.customer_id,
                subtotal_cents = rental.subtotal_cents,
                "Created rental request"
            );
            (StatusCode::CREATED, Json(DataResponse { data: rental })).into_response()
        }
        Err(e) => match e.downcast_ref::<BookingError>() {
            Some(booking_error) => {
                json_error(booking_error_status(booking_error), &booking_error.to_string())
                    .into_response()
            }
            None => {
                error!(error = %e, "Failed to create rental");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create rental")
                    .into_response()
            }
        },
    }
}

/// GET /rentals
pub async fn get_my_rentals(auth_user: AuthUser, State(state): State<AppState>) -> impl IntoResponse {
    let rentals_repo = RentalsRepository::new(state.pool);
    match rentals_repo.get_by_customer_id(auth_user.0.id).await {
        Ok(rentals) => Json(DataListResponse { data: rentals }).into_response(),
        Err(e) => {
            error!(user_id = %auth_user.0.id, error = %e, "Failed to get rentals");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get rentals").into_response()
        }
    }
}

/// GET /owner/rentals
pub async fn get_owner_rentals(
    owner: OwnerUser,
    State(state): State<AppState>,
    Query(params): Query<RentalListQuery>,
) -> impl IntoResponse {
    let rentals_repo = RentalsRepository::new(state.pool);
    match rentals_repo
        .list(Some(owner.0.id), params.status, page_limit(params.limit))
        .await
    {
        Ok(rentals) => Json(DataListResponse { data: rentals }).into_response(),
        Err(e) => {
            error!(owner_id = %owner.0.id, error = %e, "Failed to get owner rentals");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get rentals").into_response()
        }
    }
}

/// GET /admin/rentals
pub async fn get_all_rentals(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<RentalListQuery>,
) -> impl IntoResponse {
    let rentals_repo = RentalsRepository::new(state.pool);
    match rentals_repo
        .list(None, params.status, page_limit(params.limit))
        .await
    {
        Ok(rentals) => Json(DataListResponse { data: rentals }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list rentals");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get rentals").into_response()
        }
    }
}

/// GET /rentals/{id}
pub async fn get_rental_by_id(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
) -> impl IntoResponse {
    let (rental, actor) = match state.rental_service().load_for(rental_id, &auth_user.0).await {
        Ok(found) => found,
        Err(e) => return e.into_response(),
    };

    let cars_repo = CarsRepository::new(state.pool);
    let car = match cars_repo.get_by_id(rental.car_id).await {
        Ok(car) => car,
        Err(e) => {
            error!(rental_id = %rental_id, error = %e, "Failed to get car for rental");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get rental")
                .into_response();
        }
    };

    let available_transitions = available_transitions(&rental, actor);
    Json(DataResponse {
        data: RentalDetailView {
            rental,
            car,
            available_transitions,
        },
    })
    .into_response()
}

/// GET /rentals/{id}/transitions
pub async fn get_rental_transitions(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.rental_service().load_for(rental_id, &auth_user.0).await {
        Ok((rental, actor)) => Json(DataListResponse {
            data: available_transitions(&rental, actor),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn apply_transition(
    state: AppState,
    user: User,
    rental_id: Uuid,
    to: RentalStatus,
    reason: Option<String>,
) -> axum::response::Response {
    let reason = reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());

    match state
        .rental_service()
        .transition(rental_id, &user, to, reason)
        .await
    {
        Ok(rental) => Json(DataResponse { data: rental }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /rentals/{id}/approve
pub async fn approve_rental(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
) -> impl IntoResponse {
    apply_transition(state, auth_user.0, rental_id, RentalStatus::Approved, None).await
}

/// POST /rentals/{id}/reject
pub async fn reject_rental(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
    payload: Option<Json<TransitionRequest>>,
) -> impl IntoResponse {
    let reason = payload.and_then(|Json(body)| body.reason);
    apply_transition(state, auth_user.0, rental_id, RentalStatus::Rejected, reason).await
}

/// POST /rentals/{id}/start
pub async fn start_rental(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
) -> impl IntoResponse {
    apply_transition(state, auth_user.0, rental_id, RentalStatus::Active, None).await
}

/// POST /rentals/{id}/complete
pub async fn complete_rental(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
) -> impl IntoResponse {
    apply_transition(state, auth_user.0, rental_id, RentalStatus::Completed, None).await
}

/// POST /rentals/{id}/cancel
pub async fn cancel_rental(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
    payload: Option<Json<TransitionRequest>>,
) -> impl IntoResponse {
    let reason = payload.and_then(|Json(body)| body.reason);
    apply_transition(state, auth_user.0, rental_id, RentalStatus::Cancelled, reason).await
}

/// POST /rentals/{id}/checkout
pub async fn create_checkout(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(rental_id): Path<Uuid>,
) -> impl IntoResponse {
    match state
        .rental_service()
        .start_checkout(rental_id, &auth_user.0)
        .await
    {
        Ok(link) => Json(DataResponse {
            data: CheckoutResponse {
                checkout_url: link.url,
                session_id: link.session_id,
            },
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}
