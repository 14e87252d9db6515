use chrono::{DateTime, Datelike, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::CarStatus")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    /// Newly listed, waiting for an admin to approve it
    #[db_enum(rename = "pending_review")]
    PendingReview,
    #[db_enum(rename = "available")]
    Available,
    #[db_enum(rename = "unavailable")]
    Unavailable,
    #[db_enum(rename = "retired")]
    Retired,
}

impl CarStatus {
    pub const ALL: [CarStatus; 4] = [
        CarStatus::PendingReview,
        CarStatus::Available,
        CarStatus::Unavailable,
        CarStatus::Retired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CarStatus::PendingReview => "pending_review",
            CarStatus::Available => "available",
            CarStatus::Unavailable => "unavailable",
            CarStatus::Retired => "retired",
        }
    }

    /// Whether an owner may flip the listing to `to` themselves.
    /// Leaving review and un-retiring are admin decisions.
    pub fn owner_can_set(&self, to: CarStatus) -> bool {
        matches!(
            (self, to),
            (CarStatus::Available, CarStatus::Unavailable)
                | (CarStatus::Unavailable, CarStatus::Available)
                | (
                    CarStatus::PendingReview | CarStatus::Available | CarStatus::Unavailable,
                    CarStatus::Retired
                )
        )
    }
}

impl std::str::FromStr for CarStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_review" => Ok(CarStatus::PendingReview),
            "available" => Ok(CarStatus::Available),
            "unavailable" => Ok(CarStatus::Unavailable),
            "retired" => Ok(CarStatus::Retired),
            other => Err(anyhow::anyhow!("Unknown car status: {}", other)),
        }
    }
}

/// API model for cars
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub license_plate: String,
    pub location: String,
    pub seats: i32,
    pub description: Option<String>,
    pub daily_rate_cents: i32,
    pub status: CarStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Car {
    pub fn display_name(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

/// Diesel model for the cars table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::cars)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CarModel {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub license_plate: String,
    pub location: String,
    pub seats: i32,
    pub description: Option<String>,
    pub daily_rate_cents: i32,
    pub status: CarStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert model for new cars
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::cars)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewCar {
    pub owner_id: Uuid,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub license_plate: String,
    pub location: String,
    pub seats: i32,
    pub description: Option<String>,
    pub daily_rate_cents: i32,
    pub status: CarStatus,
}

/// Owner-editable listing fields
#[derive(Debug, Clone, Default, AsChangeset, Deserialize)]
#[diesel(table_name = crate::schema::cars)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCar {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub location: Option<String>,
    pub seats: Option<i32>,
    pub description: Option<String>,
    pub daily_rate_cents: Option<i32>,
}

/// Public search filters
#[derive(Debug, Clone, Default)]
pub struct CarSearch {
    pub location: Option<String>,
    pub max_daily_rate_cents: Option<i32>,
    pub seats_min: Option<i32>,
    /// Only cars with no blocking rental in `[start, end)`
    pub available_between: Option<(NaiveDate, NaiveDate)>,
    pub limit: i64,
}

impl From<CarModel> for Car {
    fn from(model: CarModel) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            make: model.make,
            model: model.model,
            year: model.year,
            license_plate: model.license_plate,
            location: model.location,
            seats: model.seats,
            description: model.description,
            daily_rate_cents: model.daily_rate_cents,
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

pub fn validate_year(year: i32) -> Result<(), String> {
    let max_year = Utc::now().year() + 1;
    if !(1950..=max_year).contains(&year) {
        return Err(format!("Year must be between 1950 and {}", max_year));
    }
    Ok(())
}

pub fn validate_seats(seats: i32) -> Result<(), String> {
    if !(1..=15).contains(&seats) {
        return Err("Seats must be between 1 and 15".to_string());
    }
    Ok(())
}

pub fn validate_daily_rate(daily_rate_cents: i32) -> Result<(), String> {
    if daily_rate_cents <= 0 {
        return Err("Daily rate must be greater than 0".to_string());
    }
    Ok(())
}

/// Uppercase and strip spaces so "ab 123" and "AB123" collide on the unique index
pub fn normalize_plate(plate: &str) -> String {
    plate
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

impl NewCar {
    pub fn validate(&self) -> Result<(), String> {
        if self.make.trim().is_empty() || self.model.trim().is_empty() {
            return Err("Make and model are required".to_string());
        }
        if self.license_plate.is_empty() {
            return Err("License plate is required".to_string());
        }
        if self.location.trim().is_empty() {
            return Err("Location is required".to_string());
        }
        validate_year(self.year)?;
        validate_seats(self.seats)?;
        validate_daily_rate(self.daily_rate_cents)
    }
}

impl UpdateCar {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(year) = self.year {
            validate_year(year)?;
        }
        if let Some(seats) = self.seats {
            validate_seats(seats)?;
        }
        if let Some(rate) = self.daily_rate_cents {
            validate_daily_rate(rate)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_car() -> NewCar {
        NewCar {
            owner_id: Uuid::now_v7(),
            make: "Toyota".to_string(),
            model: "Corolla".to_string(),
            year: 2020,
            license_plate: normalize_plate("abc 123"),
            location: "Austin, TX".to_string(),
            seats: 5,
            description: None,
            daily_rate_cents: 4_500,
            status: CarStatus::PendingReview,
        }
    }

    #[test]
    fn test_valid_car() {
        assert!(new_car().validate().is_ok());
        assert_eq!(new_car().license_plate, "ABC123");
    }

    #[test]
    fn test_invalid_fields() {
        let mut car = new_car();
        car.year = 1900;
        assert!(car.validate().is_err());

        let mut car = new_car();
        car.seats = 0;
        assert!(car.validate().is_err());

        let mut car = new_car();
        car.daily_rate_cents = 0;
        assert!(car.validate().is_err());

        let mut car = new_car();
        car.make = "  ".to_string();
        assert!(car.validate().is_err());
    }

    #[test]
    fn test_partial_update_validation() {
        assert!(UpdateCar::default().validate().is_ok());
        let update = UpdateCar {
            seats: Some(40),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_owner_status_changes() {
        assert!(CarStatus::Available.owner_can_set(CarStatus::Unavailable));
        assert!(CarStatus::Unavailable.owner_can_set(CarStatus::Available));
        assert!(CarStatus::PendingReview.owner_can_set(CarStatus::Retired));
        assert!(!CarStatus::PendingReview.owner_can_set(CarStatus::Available));
        assert!(!CarStatus::Retired.owner_can_set(CarStatus::Available));
    }
}
