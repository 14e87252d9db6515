use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::cars::Car;
use crate::rentals::{Rental, RentalStatus};

#[derive(Debug, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct CreateRentalRequest {
    pub car_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub customer_note: Option<String>,
}

#[derive(Debug, Default, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
pub struct TransitionRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RentalListQuery {
    pub status: Option<RentalStatus>,
    pub limit: Option<i64>,
}

/// A rental with its car and what the caller can do next
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalDetailView {
    pub rental: Rental,
    pub car: Option<Car>,
    pub available_transitions: Vec<RentalStatus>,
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
}
