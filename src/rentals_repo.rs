use anyhow::Result;
use chrono::NaiveDate;
use diesel::dsl::{count_star, exists, sum};
use diesel::prelude::*;
use uuid::Uuid;

use crate::cars::{CarModel, CarStatus};
use crate::rentals::{
    BookingError, Commission, NewRental, PaymentStatus, Rental, RentalChanges, RentalModel,
    RentalQuote, RentalStatus, validate_booking_window,
};
use crate::web::PgPool;

/// A customer's booking request, validated and priced inside the repository
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub customer_note: Option<String>,
    pub today: NaiveDate,
}

#[derive(Clone)]
pub struct RentalsRepository {
    pool: PgPool,
}

impl RentalsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a rental by ID
    pub async fn get_by_id(&self, rental_id: Uuid) -> Result<Option<Rental>> {
        use crate::schema::rentals::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rental: Option<RentalModel> = dsl::rentals
                .filter(dsl::id.eq(rental_id))
                .select(RentalModel::as_select())
                .first(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(rental)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Book a car.
    ///
    /// The car row is locked for the duration of the transaction, so two
    /// concurrent requests for overlapping dates cannot both pass the overlap
    /// check. Rule violations come back as a [`BookingError`] inside the
    /// `anyhow::Error`.
    pub async fn create_booking(
        &self,
        request: BookingRequest,
        commission: Commission,
        currency: String,
    ) -> Result<Rental> {
        use crate::schema::{cars, rentals};

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<RentalModel, anyhow::Error, _>(|conn| {
                validate_booking_window(request.start_date, request.end_date, request.today)?;

                let car: CarModel = cars::table
                    .filter(cars::id.eq(request.car_id))
                    .select(CarModel::as_select())
                    .for_update()
                    .first(conn)
                    .optional()?
                    .ok_or(BookingError::CarNotFound)?;

                if car.owner_id == request.customer_id {
                    return Err(BookingError::OwnCar.into());
                }
                if car.status != CarStatus::Available {
                    return Err(BookingError::CarUnavailable.into());
                }

                let overlapping: bool = diesel::select(exists(
                    rentals::table
                        .filter(rentals::car_id.eq(car.id))
                        .filter(rentals::status.eq_any(RentalStatus::BLOCKING.to_vec()))
                        .filter(rentals::start_date.lt(request.end_date))
                        .filter(rentals::end_date.gt(request.start_date)),
                ))
                .get_result(conn)?;
                if overlapping {
                    return Err(BookingError::Overlap.into());
                }

                let quote = RentalQuote::compute(
                    request.start_date,
                    request.end_date,
                    car.daily_rate_cents,
                    commission,
                )?;

                let new_rental = NewRental::from_quote(
                    car.id,
                    request.customer_id,
                    car.owner_id,
                    request.start_date,
                    request.end_date,
                    quote,
                    currency,
                    request.customer_note,
                );

                let inserted: RentalModel = diesel::insert_into(rentals::table)
                    .values(&new_rental)
                    .returning(RentalModel::as_returning())
                    .get_result(conn)?;

                Ok(inserted)
            })
        })
        .await??;

        Ok(result.into())
    }

    /// A customer's own bookings, newest first
    pub async fn get_by_customer_id(&self, customer_id: Uuid) -> Result<Vec<Rental>> {
        use crate::schema::rentals::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rentals: Vec<RentalModel> = dsl::rentals
                .filter(dsl::customer_id.eq(customer_id))
                .order_by(dsl::start_date.desc())
                .select(RentalModel::as_select())
                .load(&mut conn)?;

            Ok::<Vec<RentalModel>, anyhow::Error>(rentals)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Rentals across all cars of an owner (or every owner when `owner_id` is None)
    pub async fn list(
        &self,
        owner_id: Option<Uuid>,
        status: Option<RentalStatus>,
        limit: i64,
    ) -> Result<Vec<Rental>> {
        use crate::schema::rentals::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = dsl::rentals.select(RentalModel::as_select()).into_boxed();
            if let Some(owner_id) = owner_id {
                query = query.filter(dsl::owner_id.eq(owner_id));
            }
            if let Some(status) = status {
                query = query.filter(dsl::status.eq(status));
            }

            let rentals: Vec<RentalModel> = query
                .order_by(dsl::created_at.desc())
                .limit(limit)
                .load(&mut conn)?;

            Ok::<Vec<RentalModel>, anyhow::Error>(rentals)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Move a rental from `from` to `to`, writing `changes` in the same statement.
    ///
    /// Returns None when the rental is no longer in `from`, i.e. someone else
    /// changed it first.
    pub async fn transition(
        &self,
        rental_id: Uuid,
        from: RentalStatus,
        to: RentalStatus,
        changes: RentalChanges,
    ) -> Result<Option<Rental>> {
        use crate::schema::rentals;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<RentalModel> = diesel::update(rentals::table)
                .filter(rentals::id.eq(rental_id))
                .filter(rentals::status.eq(from))
                .set((
                    rentals::status.eq(to),
                    &changes,
                    rentals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(RentalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Record a freshly created checkout session. Only approved, unpaid rentals qualify.
    pub async fn set_checkout_session(
        &self,
        rental_id: Uuid,
        session_id: String,
    ) -> Result<Option<Rental>> {
        use crate::schema::rentals;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<RentalModel> = diesel::update(rentals::table)
                .filter(rentals::id.eq(rental_id))
                .filter(rentals::status.eq(RentalStatus::Approved))
                .filter(rentals::payment_status.eq_any(vec![
                    PaymentStatus::Unpaid,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                ]))
                .set((
                    rentals::stripe_checkout_session_id.eq(Some(session_id)),
                    rentals::payment_status.eq(PaymentStatus::Pending),
                    rentals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(RentalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Mark a rental paid after Stripe confirms the checkout session.
    ///
    /// Returns None when the rental is no longer approved (for example the
    /// stale sweep cancelled it while the customer was on the payment page)
    /// or when `session_id` is not the rental's current checkout session.
    pub async fn mark_paid(
        &self,
        rental_id: Uuid,
        session_id: String,
        payment_intent_id: Option<String>,
    ) -> Result<Option<Rental>> {
        use crate::schema::rentals;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<RentalModel> = diesel::update(rentals::table)
                .filter(rentals::id.eq(rental_id))
                .filter(rentals::stripe_checkout_session_id.eq(&session_id))
                .filter(rentals::status.eq(RentalStatus::Approved))
                .filter(rentals::payment_status.eq_any(vec![
                    PaymentStatus::Unpaid,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                ]))
                .set((
                    rentals::payment_status.eq(PaymentStatus::Paid),
                    rentals::stripe_payment_intent_id.eq(payment_intent_id),
                    rentals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(RentalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Drop an abandoned checkout session back to unpaid
    pub async fn expire_checkout_session(&self, session_id: &str) -> Result<Option<Rental>> {
        use crate::schema::rentals;

        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<RentalModel> = diesel::update(rentals::table)
                .filter(rentals::stripe_checkout_session_id.eq(&session_id))
                .filter(rentals::payment_status.eq(PaymentStatus::Pending))
                .set((
                    rentals::payment_status.eq(PaymentStatus::Unpaid),
                    rentals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(RentalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Record a failed payment attempt against a rental
    pub async fn mark_payment_failed(&self, rental_id: Uuid) -> Result<Option<Rental>> {
        use crate::schema::rentals;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<RentalModel> = diesel::update(rentals::table)
                .filter(rentals::id.eq(rental_id))
                .filter(rentals::payment_status.eq(PaymentStatus::Pending))
                .set((
                    rentals::payment_status.eq(PaymentStatus::Failed),
                    rentals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(RentalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Store the Stripe refund for a cancellation that reserved one.
    /// Returns None when a refund id is already recorded.
    pub async fn record_refund(
        &self,
        rental_id: Uuid,
        stripe_refund_id: String,
        payment_status: PaymentStatus,
    ) -> Result<Option<Rental>> {
        use crate::schema::rentals;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<RentalModel> = diesel::update(rentals::table)
                .filter(rentals::id.eq(rental_id))
                .filter(rentals::status.eq(RentalStatus::Cancelled))
                .filter(rentals::stripe_refund_id.is_null())
                .set((
                    rentals::stripe_refund_id.eq(Some(stripe_refund_id)),
                    rentals::payment_status.eq(payment_status),
                    rentals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(RentalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Record a payment that reached a cancelled, never-paid rental and was
    /// refunded in full. Nothing changes if the rental already has a payment.
    pub async fn record_refunded_payment(
        &self,
        rental_id: Uuid,
        payment_intent_id: String,
        stripe_refund_id: String,
    ) -> Result<Option<Rental>> {
        use crate::schema::rentals;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<RentalModel> = diesel::update(rentals::table)
                .filter(rentals::id.eq(rental_id))
                .filter(rentals::status.eq(RentalStatus::Cancelled))
                .filter(rentals::stripe_payment_intent_id.is_null())
                .set((
                    rentals::stripe_payment_intent_id.eq(Some(payment_intent_id)),
                    rentals::stripe_refund_id.eq(Some(stripe_refund_id)),
                    rentals::payment_status.eq(PaymentStatus::Refunded),
                    rentals::refund_amount_cents.eq(rentals::subtotal_cents),
                    rentals::commission_cents.eq(0),
                    rentals::owner_payout_cents.eq(0),
                    rentals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(RentalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<RentalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Cancelled rentals whose refund was reserved but never issued
    pub async fn find_unrefunded(&self) -> Result<Vec<Rental>> {
        use crate::schema::rentals::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rentals: Vec<RentalModel> = dsl::rentals
                .filter(dsl::status.eq(RentalStatus::Cancelled))
                .filter(dsl::payment_status.eq(PaymentStatus::Paid))
                .filter(dsl::refund_amount_cents.gt(0))
                .filter(dsl::stripe_refund_id.is_null())
                .order_by(dsl::cancelled_at.asc())
                .select(RentalModel::as_select())
                .load(&mut conn)?;

            Ok::<Vec<RentalModel>, anyhow::Error>(rentals)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Rentals the stale-booking sweep should cancel as of `today`
    pub async fn find_stale(&self, today: NaiveDate) -> Result<Vec<Rental>> {
        use crate::schema::rentals::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rentals: Vec<RentalModel> = dsl::rentals
                .filter(dsl::start_date.le(today))
                .filter(
                    dsl::status.eq(RentalStatus::PendingApproval).or(dsl::status
                        .eq(RentalStatus::Approved)
                        .and(dsl::payment_status.ne(PaymentStatus::Paid))),
                )
                .order_by(dsl::start_date.asc())
                .select(RentalModel::as_select())
                .load(&mut conn)?;

            Ok::<Vec<RentalModel>, anyhow::Error>(rentals)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Rental counts per status, optionally for a single owner
    pub async fn count_by_status(
        &self,
        owner_id: Option<Uuid>,
    ) -> Result<Vec<(RentalStatus, i64)>> {
        use crate::schema::rentals::dsl;

        let pool = self.pool.clone();
        let counts = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let counts: Vec<(RentalStatus, i64)> = match owner_id {
                Some(owner_id) => dsl::rentals
                    .filter(dsl::owner_id.eq(owner_id))
                    .group_by(dsl::status)
                    .select((dsl::status, count_star()))
                    .load(&mut conn)?,
                None => dsl::rentals
                    .group_by(dsl::status)
                    .select((dsl::status, count_star()))
                    .load(&mut conn)?,
            };

            Ok::<Vec<(RentalStatus, i64)>, anyhow::Error>(counts)
        })
        .await??;

        Ok(counts)
    }
}

/// Owner payout from rentals whose money is settled: completed and paid, or
/// cancelled late with part of the payment retained.
pub fn earned_cents(conn: &mut PgConnection, owner_id: Uuid) -> QueryResult<i64> {
    use crate::schema::rentals::dsl;

    let earned: Option<i64> = dsl::rentals
        .filter(dsl::owner_id.eq(owner_id))
        .filter(
            dsl::status
                .eq(RentalStatus::Completed)
                .and(dsl::payment_status.eq(PaymentStatus::Paid))
                .or(dsl::status.eq(RentalStatus::Cancelled).and(
                    dsl::payment_status
                        .eq_any(vec![PaymentStatus::Paid, PaymentStatus::PartiallyRefunded]),
                )),
        )
        .select(sum(dsl::owner_payout_cents))
        .first(conn)?;

    Ok(earned.unwrap_or(0))
}

/// Owner payout from paid rentals that have not finished yet
pub fn pending_earnings_cents(conn: &mut PgConnection, owner_id: Uuid) -> QueryResult<i64> {
    use crate::schema::rentals::dsl;

    let pending: Option<i64> = dsl::rentals
        .filter(dsl::owner_id.eq(owner_id))
        .filter(dsl::status.eq_any(vec![RentalStatus::Approved, RentalStatus::Active]))
        .filter(dsl::payment_status.eq(PaymentStatus::Paid))
        .select(sum(dsl::owner_payout_cents))
        .first(conn)?;

    Ok(pending.unwrap_or(0))
}
