use anyhow::Result;
use diesel::dsl::{count_star, exists, not};
use diesel::prelude::*;
use uuid::Uuid;

use crate::cars::{Car, CarModel, CarSearch, CarStatus, NewCar, UpdateCar};
use crate::rentals::RentalStatus;
use crate::web::PgPool;

#[derive(Clone)]
pub struct CarsRepository {
    pool: PgPool,
}

impl CarsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a car by ID
    pub async fn get_by_id(&self, car_id: Uuid) -> Result<Option<Car>> {
        use crate::schema::cars::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let car: Option<CarModel> = dsl::cars
                .filter(dsl::id.eq(car_id))
                .select(CarModel::as_select())
                .first(&mut conn)
                .optional()?;

            Ok::<Option<CarModel>, anyhow::Error>(car)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// All cars listed by an owner, newest first
    pub async fn get_by_owner_id(&self, owner_id: Uuid) -> Result<Vec<Car>> {
        use crate::schema::cars::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let cars: Vec<CarModel> = dsl::cars
                .filter(dsl::owner_id.eq(owner_id))
                .order_by(dsl::created_at.desc())
                .select(CarModel::as_select())
                .load(&mut conn)?;

            Ok::<Vec<CarModel>, anyhow::Error>(cars)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Admin listing, optionally filtered by status
    pub async fn list(&self, status: Option<CarStatus>, limit: i64) -> Result<Vec<Car>> {
        use crate::schema::cars::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = dsl::cars.select(CarModel::as_select()).into_boxed();
            if let Some(status) = status {
                query = query.filter(dsl::status.eq(status));
            }

            let cars: Vec<CarModel> = query
                .order_by(dsl::created_at.desc())
                .limit(limit)
                .load(&mut conn)?;

            Ok::<Vec<CarModel>, anyhow::Error>(cars)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Public search over available cars
    pub async fn search(&self, search: CarSearch) -> Result<Vec<Car>> {
        use crate::schema::{cars, rentals};

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = cars::table
                .filter(cars::status.eq(CarStatus::Available))
                .select(CarModel::as_select())
                .into_boxed();

            if let Some(location) = search.location.as_deref() {
                query = query.filter(cars::location.ilike(like_pattern(location)));
            }
            if let Some(max_rate) = search.max_daily_rate_cents {
                query = query.filter(cars::daily_rate_cents.le(max_rate));
            }
            if let Some(seats) = search.seats_min {
                query = query.filter(cars::seats.ge(seats));
            }
            if let Some((start, end)) = search.available_between {
                let blocking = rentals::table
                    .filter(rentals::car_id.eq(cars::id))
                    .filter(rentals::status.eq_any(RentalStatus::BLOCKING.to_vec()))
                    .filter(rentals::start_date.lt(end))
                    .filter(rentals::end_date.gt(start));
                query = query.filter(not(exists(blocking)));
            }

            let cars: Vec<CarModel> = query
                .order_by((cars::daily_rate_cents.asc(), cars::created_at.desc()))
                .limit(search.limit)
                .load(&mut conn)?;

            Ok::<Vec<CarModel>, anyhow::Error>(cars)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Create a new listing
    pub async fn create(&self, new_car: NewCar) -> Result<Car> {
        use crate::schema::cars::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: CarModel = diesel::insert_into(dsl::cars)
                .values(&new_car)
                .returning(CarModel::as_returning())
                .get_result(&mut conn)?;

            Ok::<CarModel, anyhow::Error>(inserted)
        })
        .await??;

        Ok(result.into())
    }

    /// Update listing details
    pub async fn update(&self, car_id: Uuid, update: UpdateCar) -> Result<Option<Car>> {
        use crate::schema::cars;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<CarModel> = diesel::update(cars::table)
                .filter(cars::id.eq(car_id))
                .set((&update, cars::updated_at.eq(diesel::dsl::now)))
                .returning(CarModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<CarModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    pub async fn set_status(&self, car_id: Uuid, status: CarStatus) -> Result<Option<Car>> {
        use crate::schema::cars;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<CarModel> = diesel::update(cars::table)
                .filter(cars::id.eq(car_id))
                .set((
                    cars::status.eq(status),
                    cars::updated_at.eq(diesel::dsl::now),
                ))
                .returning(CarModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<CarModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Car counts per status, optionally for a single owner
    pub async fn count_by_status(&self, owner_id: Option<Uuid>) -> Result<Vec<(CarStatus, i64)>> {
        use crate::schema::cars::dsl;

        let pool = self.pool.clone();
        let counts = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let counts: Vec<(CarStatus, i64)> = match owner_id {
                Some(owner_id) => dsl::cars
                    .filter(dsl::owner_id.eq(owner_id))
                    .group_by(dsl::status)
                    .select((dsl::status, count_star()))
                    .load(&mut conn)?,
                None => dsl::cars
                    .group_by(dsl::status)
                    .select((dsl::status, count_star()))
                    .load(&mut conn)?,
            };
            Ok::<Vec<(CarStatus, i64)>, anyhow::Error>(counts)
        })
        .await??;

        Ok(counts)
    }
}

/// Build an ILIKE substring pattern, escaping the wildcard characters
fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
