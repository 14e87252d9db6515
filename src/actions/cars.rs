use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::{AdminUser, OwnerUser};
use crate::cars::{CarSearch, CarStatus, NewCar, UpdateCar, normalize_plate};
use crate::cars_repo::CarsRepository;
use crate::web::AppState;

use super::users::is_unique_violation;
use super::{DataListResponse, DataResponse, json_error, page_limit};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarSearchParams {
    pub location: Option<String>,
    pub max_daily_rate_cents: Option<i32>,
    pub seats_min: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<i64>,
}

impl CarSearchParams {
    fn into_search(self) -> Result<CarSearch, &'static str> {
        let available_between = match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if end > start => Some((start, end)),
            (Some(_), Some(_)) => return Err("End date must be after start date"),
            (None, None) => None,
            _ => return Err("Both startDate and endDate are required to filter by dates"),
        };

        Ok(CarSearch {
            location: self.location.filter(|l| !l.trim().is_empty()),
            max_daily_rate_cents: self.max_daily_rate_cents,
            seats_min: self.seats_min,
            available_between,
            limit: page_limit(self.limit),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCarRequest {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub license_plate: String,
    pub location: String,
    pub seats: i32,
    pub description: Option<String>,
    pub daily_rate_cents: i32,
}

#[derive(Debug, Deserialize)]
pub struct SetCarStatusRequest {
    pub status: CarStatus,
}

#[derive(Debug, Deserialize)]
pub struct AdminCarQuery {
    pub status: Option<CarStatus>,
    pub limit: Option<i64>,
}

/// GET /cars
pub async fn search_cars(
    State(state): State<AppState>,
    Query(params): Query<CarSearchParams>,
) -> impl IntoResponse {
    let search = match params.into_search() {
        Ok(search) => search,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message).into_response(),
    };

    let cars_repo = CarsRepository::new(state.pool);
    match cars_repo.search(search).await {
        Ok(cars) => Json(DataListResponse { data: cars }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to search cars");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to search cars").into_response()
        }
    }
}

/// GET /cars/{id}
pub async fn get_car_by_id(
    State(state): State<AppState>,
    Path(car_id): Path<Uuid>,
) -> impl IntoResponse {
    let cars_repo = CarsRepository::new(state.pool);
    match cars_repo.get_by_id(car_id).await {
        Ok(Some(car)) if car.status == CarStatus::Available => {
            Json(DataResponse { data: car }).into_response()
        }
        Ok(_) => json_error(StatusCode::NOT_FOUND, "Car not found").into_response(),
        Err(e) => {
            error!(car_id = %car_id, error = %e, "Failed to get car");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get car").into_response()
        }
    }
}

/// GET /owner/cars
pub async fn get_my_cars(owner: OwnerUser, State(state): State<AppState>) -> impl IntoResponse {
    let cars_repo = CarsRepository::new(state.pool);
    match cars_repo.get_by_owner_id(owner.0.id).await {
        Ok(cars) => Json(DataListResponse { data: cars }).into_response(),
        Err(e) => {
            error!(owner_id = %owner.0.id, error = %e, "Failed to get owner cars");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get cars").into_response()
        }
    }
}

/// POST /owner/cars
pub async fn create_car(
    owner: OwnerUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateCarRequest>,
) -> impl IntoResponse {
    let new_car = NewCar {
        owner_id: owner.0.id,
        make: payload.make.trim().to_string(),
        model: payload.model.trim().to_string(),
        year: payload.year,
        license_plate: normalize_plate(&payload.license_plate),
        location: payload.location.trim().to_string(),
        seats: payload.seats,
        description: payload.description,
        daily_rate_cents: payload.daily_rate_cents,
        status: CarStatus::PendingReview,
    };
    if let Err(message) = new_car.validate() {
        return json_error(StatusCode::BAD_REQUEST, &message).into_response();
    }

    let cars_repo = CarsRepository::new(state.pool);
    match cars_repo.create(new_car).await {
        Ok(car) => {
            info!(car_id = %car.id, owner_id = %car.owner_id, "Listed car for review");
            (StatusCode::CREATED, Json(DataResponse { data: car })).into_response()
        }
        Err(e) if is_unique_violation(&e) => json_error(
            StatusCode::CONFLICT,
            "A car with this license plate is already listed",
        )
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to create car");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create car").into_response()
        }
    }
}

/// PUT /owner/cars/{id}
pub async fn update_car(
    owner: OwnerUser,
    State(state): State<AppState>,
    Path(car_id): Path<Uuid>,
    Json(payload): Json<UpdateCar>,
) -> impl IntoResponse {
    if let Err(message) = payload.validate() {
        return json_error(StatusCode::BAD_REQUEST, &message).into_response();
    }

    let cars_repo = CarsRepository::new(state.pool);
    match cars_repo.get_by_id(car_id).await {
        Ok(Some(car)) if car.owner_id == owner.0.id || owner.0.is_admin() => {}
        Ok(_) => return json_error(StatusCode::NOT_FOUND, "Car not found").into_response(),
        Err(e) => {
            error!(car_id = %car_id, error = %e, "Failed to get car");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update car")
                .into_response();
        }
    }

    match cars_repo.update(car_id, payload).await {
        Ok(Some(car)) => Json(DataResponse { data: car }).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Car not found").into_response(),
        Err(e) => {
            error!(car_id = %car_id, error = %e, "Failed to update car");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update car").into_response()
        }
    }
}

/// PUT /cars/{id}/status
///
/// Owners toggle availability or retire their own cars; admins review
/// listings and may set any status.
pub async fn set_car_status(
    user: OwnerUser,
    State(state): State<AppState>,
    Path(car_id): Path<Uuid>,
    Json(payload): Json<SetCarStatusRequest>,
) -> impl IntoResponse {
    let cars_repo = CarsRepository::new(state.pool);
    let car = match cars_repo.get_by_id(car_id).await {
        Ok(Some(car)) if car.owner_id == user.0.id || user.0.is_admin() => car,
        Ok(_) => return json_error(StatusCode::NOT_FOUND, "Car not found").into_response(),
        Err(e) => {
            error!(car_id = %car_id, error = %e, "Failed to get car");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update car")
                .into_response();
        }
    };

    if !user.0.is_admin() && !car.status.owner_can_set(payload.status) {
        return json_error(
            StatusCode::FORBIDDEN,
            &format!(
                "Cannot change a {} car to {}",
                car.status.as_str(),
                payload.status.as_str()
            ),
        )
        .into_response();
    }

    match cars_repo.set_status(car_id, payload.status).await {
        Ok(Some(car)) => {
            info!(
                car_id = %car.id,
                status = car.status.as_str(),
                by = %user.0.id,
                "Changed car status"
            );
            Json(DataResponse { data: car }).into_response()
        }
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Car not found").into_response(),
        Err(e) => {
            error!(car_id = %car_id, error = %e, "Failed to set car status");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update car").into_response()
        }
    }
}

/// GET /admin/cars
pub async fn get_all_cars(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<AdminCarQuery>,
) -> impl IntoResponse {
    let cars_repo = CarsRepository::new(state.pool);
    match cars_repo.list(params.status, page_limit(params.limit)).await {
        Ok(cars) => Json(DataListResponse { data: cars }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list cars");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get cars").into_response()
        }
    }
}
