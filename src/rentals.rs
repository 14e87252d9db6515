//! Rental bookings and the approval workflow.
//!
//! A rental moves through
//!
//! ```text
//! pending_approval ──► approved ──► active ──► completed
//!        │                │
//!        ├──► rejected    └──► cancelled
//!        └──► cancelled
//! ```
//!
//! with an independent [`PaymentStatus`] tracking the Stripe side. Prices are
//! snapshotted when the booking is written, so later changes to a car's daily
//! rate or the platform commission never touch existing rentals.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::users::User;

/// Longest booking a customer can make in one request
pub const MAX_RENTAL_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::RentalStatus")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    #[db_enum(rename = "pending_approval")]
    PendingApproval,
    #[db_enum(rename = "approved")]
    Approved,
    #[db_enum(rename = "rejected")]
    Rejected,
    #[db_enum(rename = "active")]
    Active,
    #[db_enum(rename = "completed")]
    Completed,
    #[db_enum(rename = "cancelled")]
    Cancelled,
}

impl RentalStatus {
    pub const ALL: [RentalStatus; 6] = [
        RentalStatus::PendingApproval,
        RentalStatus::Approved,
        RentalStatus::Rejected,
        RentalStatus::Active,
        RentalStatus::Completed,
        RentalStatus::Cancelled,
    ];

    /// Statuses that hold the car for the booked dates
    pub const BLOCKING: [RentalStatus; 3] = [
        RentalStatus::PendingApproval,
        RentalStatus::Approved,
        RentalStatus::Active,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RentalStatus::PendingApproval => "pending_approval",
            RentalStatus::Approved => "approved",
            RentalStatus::Rejected => "rejected",
            RentalStatus::Active => "active",
            RentalStatus::Completed => "completed",
            RentalStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_statuses().is_empty()
    }

    pub fn is_blocking(&self) -> bool {
        Self::BLOCKING.contains(self)
    }

    pub fn next_statuses(&self) -> &'static [RentalStatus] {
        match self {
            RentalStatus::PendingApproval => &[
                RentalStatus::Approved,
                RentalStatus::Rejected,
                RentalStatus::Cancelled,
            ],
            RentalStatus::Approved => &[RentalStatus::Active, RentalStatus::Cancelled],
            RentalStatus::Active => &[RentalStatus::Completed],
            RentalStatus::Rejected | RentalStatus::Completed | RentalStatus::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RentalStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RentalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown rental status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::PaymentStatus")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[db_enum(rename = "unpaid")]
    Unpaid,
    /// Checkout session open, waiting on Stripe
    #[db_enum(rename = "pending")]
    Pending,
    #[db_enum(rename = "paid")]
    Paid,
    #[db_enum(rename = "failed")]
    Failed,
    #[db_enum(rename = "refunded")]
    Refunded,
    #[db_enum(rename = "partially_refunded")]
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Whether a new checkout session may be opened
    pub fn accepts_checkout(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Unpaid | PaymentStatus::Pending | PaymentStatus::Failed
        )
    }
}

/// Who is acting on a rental, derived from the signed-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentalActor {
    Customer,
    Owner,
    Admin,
}

impl RentalActor {
    /// Returns None when the user has no relationship to the rental
    pub fn for_user(user: &User, rental: &Rental) -> Option<Self> {
        if user.is_admin() {
            Some(RentalActor::Admin)
        } else if user.id == rental.owner_id {
            Some(RentalActor::Owner)
        } else if user.id == rental.customer_id {
            Some(RentalActor::Customer)
        } else {
            None
        }
    }

    fn may_move_to(&self, to: RentalStatus) -> bool {
        match to {
            RentalStatus::Cancelled => true,
            RentalStatus::Approved
            | RentalStatus::Rejected
            | RentalStatus::Active
            | RentalStatus::Completed => {
                matches!(self, RentalActor::Owner | RentalActor::Admin)
            }
            RentalStatus::PendingApproval => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    NotAllowed {
        from: RentalStatus,
        to: RentalStatus,
    },
    Forbidden {
        to: RentalStatus,
    },
    PaymentRequired,
    /// The row changed underneath us between read and write
    Conflict {
        expected: RentalStatus,
    },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::NotAllowed { from, to } => {
                write!(f, "Cannot move a rental from {} to {}", from, to)
            }
            TransitionError::Forbidden { to } => {
                write!(f, "You are not allowed to mark this rental {}", to)
            }
            TransitionError::PaymentRequired => {
                write!(f, "Rental must be paid before it can start")
            }
            TransitionError::Conflict { expected } => write!(
                f,
                "Rental is no longer {}; reload and try again",
                expected
            ),
        }
    }
}

impl std::error::Error for TransitionError {}

/// Check a requested status change against the workflow and the actor's role.
pub fn check_transition(
    rental: &Rental,
    to: RentalStatus,
    actor: RentalActor,
) -> Result<(), TransitionError> {
    if !rental.status.next_statuses().contains(&to) {
        return Err(TransitionError::NotAllowed {
            from: rental.status,
            to,
        });
    }
    if !actor.may_move_to(to) {
        return Err(TransitionError::Forbidden { to });
    }
    if to == RentalStatus::Active && rental.payment_status != PaymentStatus::Paid {
        return Err(TransitionError::PaymentRequired);
    }
    Ok(())
}

/// Statuses the actor could move this rental to right now
pub fn available_transitions(rental: &Rental, actor: RentalActor) -> Vec<RentalStatus> {
    rental
        .status
        .next_statuses()
        .iter()
        .copied()
        .filter(|to| check_transition(rental, *to, actor).is_ok())
        .collect()
}

/// Platform commission expressed in basis points (1000 = 10%)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commission {
    bps: u32,
}

impl Commission {
    pub fn new(bps: u32) -> anyhow::Result<Self> {
        if bps > 10_000 {
            anyhow::bail!("Commission must be at most 10000 bps, got {}", bps);
        }
        Ok(Self { bps })
    }

    pub fn bps(&self) -> u32 {
        self.bps
    }

    /// Commission in cents for a given amount in cents, rounded down
    pub fn fee(&self, amount_cents: i32) -> i32 {
        ((amount_cents as i64 * self.bps as i64) / 10_000) as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    CarNotFound,
    CarUnavailable,
    OwnCar,
    EndBeforeStart,
    StartInPast,
    TooLong,
    AmountTooLarge,
    Overlap,
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::CarNotFound => write!(f, "Car not found"),
            BookingError::CarUnavailable => write!(f, "Car is not available for booking"),
            BookingError::OwnCar => write!(f, "You cannot book your own car"),
            BookingError::EndBeforeStart => write!(f, "End date must be after start date"),
            BookingError::StartInPast => write!(f, "Start date cannot be in the past"),
            BookingError::TooLong => {
                write!(f, "Rentals can be at most {} days long", MAX_RENTAL_DAYS)
            }
            BookingError::AmountTooLarge => write!(f, "Booking total is too large"),
            BookingError::Overlap => write!(f, "Car is already booked for these dates"),
        }
    }
}

impl std::error::Error for BookingError {}

/// Price snapshot stored on a rental at booking time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct RentalQuote {
    pub days: i32,
    pub daily_rate_cents: i32,
    pub subtotal_cents: i32,
    pub commission_cents: i32,
    pub owner_payout_cents: i32,
}

impl RentalQuote {
    /// Price `[start_date, end_date)` at the given daily rate
    pub fn compute(
        start_date: NaiveDate,
        end_date: NaiveDate,
        daily_rate_cents: i32,
        commission: Commission,
    ) -> Result<Self, BookingError> {
        let days = (end_date - start_date).num_days();
        if days < 1 {
            return Err(BookingError::EndBeforeStart);
        }
        if days > MAX_RENTAL_DAYS {
            return Err(BookingError::TooLong);
        }

        let subtotal = days * daily_rate_cents as i64;
        let subtotal_cents = i32::try_from(subtotal).map_err(|_| BookingError::AmountTooLarge)?;
        let commission_cents = commission.fee(subtotal_cents);

        Ok(Self {
            days: days as i32,
            daily_rate_cents,
            subtotal_cents,
            commission_cents,
            owner_payout_cents: subtotal_cents - commission_cents,
        })
    }
}

/// Validate a requested booking window against today's date
pub fn validate_booking_window(
    start_date: NaiveDate,
    end_date: NaiveDate,
    today: NaiveDate,
) -> Result<(), BookingError> {
    if end_date <= start_date {
        return Err(BookingError::EndBeforeStart);
    }
    if start_date < today {
        return Err(BookingError::StartInPast);
    }
    if (end_date - start_date).num_days() > MAX_RENTAL_DAYS {
        return Err(BookingError::TooLong);
    }
    Ok(())
}

/// Half-open date ranges `[a_start, a_end)` and `[b_start, b_end)` share a day
pub fn ranges_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// How much of a paid booking is returned on cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    /// Customers cancelling at least this long before pickup get everything back
    pub full_refund_hours: i64,
    /// Share refunded for later customer cancellations
    pub late_cancel_refund_bps: u32,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            full_refund_hours: 48,
            late_cancel_refund_bps: 5000,
        }
    }
}

/// Outcome of applying the refund policy to a cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct RefundQuote {
    pub refund_cents: i32,
    pub commission_cents: i32,
    pub owner_payout_cents: i32,
    pub payment_status: PaymentStatus,
}

impl RefundPolicy {
    pub fn new(full_refund_hours: i64, late_cancel_refund_bps: u32) -> anyhow::Result<Self> {
        if full_refund_hours < 0 {
            anyhow::bail!("Full refund window cannot be negative");
        }
        if late_cancel_refund_bps > 10_000 {
            anyhow::bail!(
                "Late cancellation refund must be at most 10000 bps, got {}",
                late_cancel_refund_bps
            );
        }
        Ok(Self {
            full_refund_hours,
            late_cancel_refund_bps,
        })
    }

    /// Work out the refund if `actor` cancelled `rental` at `now`.
    ///
    /// Commission and payout are rescaled to the retained amount using the
    /// rate captured at booking time.
    pub fn quote(&self, rental: &Rental, actor: RentalActor, now: DateTime<Utc>) -> RefundQuote {
        if rental.payment_status != PaymentStatus::Paid {
            let payment_status = match rental.payment_status {
                PaymentStatus::Pending => PaymentStatus::Unpaid,
                other => other,
            };
            return RefundQuote {
                refund_cents: 0,
                commission_cents: rental.commission_cents,
                owner_payout_cents: rental.owner_payout_cents,
                payment_status,
            };
        }

        let subtotal = rental.subtotal_cents;
        let pickup = rental.start_date.and_time(NaiveTime::MIN).and_utc();
        let early_enough = pickup - now >= Duration::hours(self.full_refund_hours);

        let refund_cents = match actor {
            RentalActor::Owner | RentalActor::Admin => subtotal,
            RentalActor::Customer if early_enough => subtotal,
            RentalActor::Customer => {
                ((subtotal as i64 * self.late_cancel_refund_bps as i64) / 10_000) as i32
            }
        };

        let retained = subtotal - refund_cents;
        let commission_cents = if subtotal > 0 {
            ((rental.commission_cents as i64 * retained as i64) / subtotal as i64) as i32
        } else {
            0
        };

        let payment_status = if refund_cents == 0 {
            PaymentStatus::Paid
        } else if retained == 0 {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        RefundQuote {
            refund_cents,
            commission_cents,
            owner_payout_cents: retained - commission_cents,
            payment_status,
        }
    }
}

/// Whether the stale-booking sweep should cancel this rental on `today`
pub fn is_stale(rental: &Rental, today: NaiveDate) -> bool {
    if rental.start_date > today {
        return false;
    }
    match rental.status {
        RentalStatus::PendingApproval => true,
        RentalStatus::Approved => rental.payment_status != PaymentStatus::Paid,
        _ => false,
    }
}

/// API model for rentals
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Rental {
    pub id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub owner_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i32,
    pub daily_rate_cents: i32,
    pub subtotal_cents: i32,
    pub commission_cents: i32,
    pub owner_payout_cents: i32,
    pub currency: String,
    pub status: RentalStatus,
    pub payment_status: PaymentStatus,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_refund_id: Option<String>,
    pub refund_amount_cents: i32,
    pub customer_note: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diesel model for the rentals table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::rentals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RentalModel {
    pub id: Uuid,
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub owner_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i32,
    pub daily_rate_cents: i32,
    pub subtotal_cents: i32,
    pub commission_cents: i32,
    pub owner_payout_cents: i32,
    pub currency: String,
    pub status: RentalStatus,
    pub payment_status: PaymentStatus,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_refund_id: Option<String>,
    pub refund_amount_cents: i32,
    pub customer_note: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert model for new rentals
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::rentals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewRental {
    pub car_id: Uuid,
    pub customer_id: Uuid,
    pub owner_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i32,
    pub daily_rate_cents: i32,
    pub subtotal_cents: i32,
    pub commission_cents: i32,
    pub owner_payout_cents: i32,
    pub currency: String,
    pub customer_note: Option<String>,
}

impl NewRental {
    #[allow(clippy::too_many_arguments)]
    pub fn from_quote(
        car_id: Uuid,
        customer_id: Uuid,
        owner_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        quote: RentalQuote,
        currency: String,
        customer_note: Option<String>,
    ) -> Self {
        Self {
            car_id,
            customer_id,
            owner_id,
            start_date,
            end_date,
            days: quote.days,
            daily_rate_cents: quote.daily_rate_cents,
            subtotal_cents: quote.subtotal_cents,
            commission_cents: quote.commission_cents,
            owner_payout_cents: quote.owner_payout_cents,
            currency,
            customer_note,
        }
    }
}

/// Columns written alongside a status change. `None` leaves a column as is.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::rentals)]
pub struct RentalChanges {
    pub payment_status: Option<PaymentStatus>,
    pub stripe_payment_intent_id: Option<String>,
    pub commission_cents: Option<i32>,
    pub owner_payout_cents: Option<i32>,
    pub refund_amount_cents: Option<i32>,
    pub stripe_refund_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl RentalChanges {
    /// Timestamp column stamped by entering `status`
    pub fn stamped(status: RentalStatus, at: DateTime<Utc>) -> Self {
        let mut changes = Self::default();
        match status {
            RentalStatus::Approved => changes.approved_at = Some(at),
            RentalStatus::Active => changes.started_at = Some(at),
            RentalStatus::Completed => changes.completed_at = Some(at),
            RentalStatus::Cancelled => changes.cancelled_at = Some(at),
            RentalStatus::PendingApproval | RentalStatus::Rejected => {}
        }
        changes
    }

    pub fn with_refund(mut self, quote: &RefundQuote, stripe_refund_id: Option<String>) -> Self {
        self.payment_status = Some(quote.payment_status);
        self.commission_cents = Some(quote.commission_cents);
        self.owner_payout_cents = Some(quote.owner_payout_cents);
        self.refund_amount_cents = Some(quote.refund_cents);
        self.stripe_refund_id = stripe_refund_id;
        self
    }

    /// Claim a refund that is issued after the row is written. Payment status
    /// stays `paid` until the Stripe refund id is recorded.
    pub fn with_reserved_refund(mut self, quote: &RefundQuote) -> Self {
        self.commission_cents = Some(quote.commission_cents);
        self.owner_payout_cents = Some(quote.owner_payout_cents);
        self.refund_amount_cents = Some(quote.refund_cents);
        self
    }
}

impl From<RentalModel> for Rental {
    fn from(model: RentalModel) -> Self {
        Self {
            id: model.id,
            car_id: model.car_id,
            customer_id: model.customer_id,
            owner_id: model.owner_id,
            start_date: model.start_date,
            end_date: model.end_date,
            days: model.days,
            daily_rate_cents: model.daily_rate_cents,
            subtotal_cents: model.subtotal_cents,
            commission_cents: model.commission_cents,
            owner_payout_cents: model.owner_payout_cents,
            currency: model.currency,
            status: model.status,
            payment_status: model.payment_status,
            stripe_checkout_session_id: model.stripe_checkout_session_id,
            stripe_payment_intent_id: model.stripe_payment_intent_id,
            stripe_refund_id: model.stripe_refund_id,
            refund_amount_cents: model.refund_amount_cents,
            customer_note: model.customer_note,
            rejection_reason: model.rejection_reason,
            cancellation_reason: model.cancellation_reason,
            cancelled_by: model.cancelled_by,
            approved_at: model.approved_at,
            started_at: model.started_at,
            completed_at: model.completed_at,
            cancelled_at: model.cancelled_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
