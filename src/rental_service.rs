use anyhow::Context;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionPaymentIntentData, CreateRefund, Currency, PaymentIntentId, Refund,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::json_error;
use crate::cars_repo::CarsRepository;
use crate::config::AppConfig;
use crate::rentals::{
    PaymentStatus, RefundPolicy, Rental, RentalActor, RentalChanges, RentalStatus,
    TransitionError, check_transition,
};
use crate::rentals_repo::RentalsRepository;
use crate::stripe_client::StripeConfig;
use crate::users::User;
use crate::web::PgPool;

/// Reason recorded on rentals cancelled by the stale-booking sweep
pub const EXPIRED_REASON: &str = "expired";

#[derive(Debug)]
pub enum RentalActionError {
    /// Missing, or not visible to the caller
    NotFound,
    /// Only the booking customer can pay for it
    NotCustomer,
    Transition(TransitionError),
    PaymentsUnavailable,
    Stripe(String),
    Internal(anyhow::Error),
}

impl std::fmt::Display for RentalActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RentalActionError::NotFound => write!(f, "Rental not found"),
            RentalActionError::NotCustomer => {
                write!(f, "Only the customer who booked this rental can pay for it")
            }
            RentalActionError::Transition(e) => write!(f, "{}", e),
            RentalActionError::PaymentsUnavailable => write!(f, "Payments are not configured"),
            RentalActionError::Stripe(message) => write!(f, "Payment provider error: {}", message),
            RentalActionError::Internal(e) => write!(f, "{:#}", e),
        }
    }
}

impl From<anyhow::Error> for RentalActionError {
    fn from(e: anyhow::Error) -> Self {
        RentalActionError::Internal(e)
    }
}

impl From<TransitionError> for RentalActionError {
    fn from(e: TransitionError) -> Self {
        RentalActionError::Transition(e)
    }
}

impl IntoResponse for RentalActionError {
    fn into_response(self) -> Response {
        let status = match &self {
            RentalActionError::NotFound => StatusCode::NOT_FOUND,
            RentalActionError::NotCustomer => StatusCode::FORBIDDEN,
            RentalActionError::Transition(TransitionError::Forbidden { .. }) => {
                StatusCode::FORBIDDEN
            }
            RentalActionError::Transition(_) => StatusCode::CONFLICT,
            RentalActionError::PaymentsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            RentalActionError::Stripe(_) => StatusCode::BAD_GATEWAY,
            RentalActionError::Internal(e) => {
                error!(error = ?e, "Rental action failed");
                return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                    .into_response();
            }
        };
        json_error(status, &self.to_string()).into_response()
    }
}

/// Checkout session handed back to the SPA
#[derive(Debug, Clone)]
pub struct CheckoutLink {
    pub session_id: String,
    pub url: String,
}

/// Rental workflow shared by the HTTP handlers, the hourly sweep and the CLI
#[derive(Clone)]
pub struct RentalService {
    pool: PgPool,
    rentals: RentalsRepository,
    refund_policy: RefundPolicy,
    base_url: String,
    stripe: Option<StripeConfig>,
}

impl RentalService {
    pub fn new(pool: PgPool, config: &AppConfig, stripe: Option<StripeConfig>) -> Self {
        Self {
            rentals: RentalsRepository::new(pool.clone()),
            pool,
            refund_policy: config.refund_policy,
            base_url: config.base_url.clone(),
            stripe,
        }
    }

    /// Load a rental the user is party to, with their role in it
    pub async fn load_for(
        &self,
        rental_id: Uuid,
        user: &User,
    ) -> Result<(Rental, RentalActor), RentalActionError> {
        let rental = self
            .rentals
            .get_by_id(rental_id)
            .await?
            .ok_or(RentalActionError::NotFound)?;
        let actor = RentalActor::for_user(user, &rental).ok_or(RentalActionError::NotFound)?;
        Ok((rental, actor))
    }

    /// Apply a status change requested by `user`.
    ///
    /// Cancelling a paid rental claims the row first and refunds through
    /// Stripe afterwards, so a concurrent status change can never leave a
    /// refund without a cancellation. A refund that fails after the claim is
    /// retried by [`RentalService::retry_refunds`].
    pub async fn transition(
        &self,
        rental_id: Uuid,
        user: &User,
        to: RentalStatus,
        reason: Option<String>,
    ) -> Result<Rental, RentalActionError> {
        let (rental, actor) = self.load_for(rental_id, user).await?;
        check_transition(&rental, to, actor)?;

        let now = Utc::now();
        let mut changes = RentalChanges::stamped(to, now);
        let mut refund_due = false;
        match to {
            RentalStatus::Rejected => changes.rejection_reason = reason,
            RentalStatus::Cancelled => {
                changes.cancellation_reason = reason;
                changes.cancelled_by = Some(user.id);

                let quote = self.refund_policy.quote(&rental, actor, now);
                if quote.refund_cents > 0 {
                    if self.stripe.is_none() {
                        return Err(RentalActionError::PaymentsUnavailable);
                    }
                    refund_due = true;
                    changes = changes.with_reserved_refund(&quote);
                } else {
                    changes = changes.with_refund(&quote, None);
                }
            }
            _ => {}
        }

        let updated = self
            .rentals
            .transition(rental.id, rental.status, to, changes)
            .await?
            .ok_or(TransitionError::Conflict {
                expected: rental.status,
            })?;

        metrics::counter!("rentals.transition", "to" => to.as_str()).increment(1);
        info!(
            rental_id = %updated.id,
            from = %rental.status,
            to = %to,
            actor = ?actor,
            "Rental status changed"
        );

        if !refund_due {
            return Ok(updated);
        }
        match self.complete_refund(&updated).await {
            Ok(refunded) => Ok(refunded),
            Err(e) => {
                error!(
                    rental_id = %updated.id,
                    refund_cents = updated.refund_amount_cents,
                    error = %e,
                    "Rental cancelled but refund failed, will retry"
                );
                Ok(updated)
            }
        }
    }

    /// Issue the refund reserved on a cancelled rental and record it
    async fn complete_refund(&self, rental: &Rental) -> Result<Rental, RentalActionError> {
        let payment_intent = rental
            .stripe_payment_intent_id
            .as_deref()
            .context("Paid rental has no payment intent")?;
        let refund_id = self
            .create_refund(
                rental.id,
                payment_intent,
                Some(rental.refund_amount_cents as i64),
                format!("refund-{}", rental.id),
            )
            .await?;

        let payment_status = if rental.refund_amount_cents >= rental.subtotal_cents {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        match self
            .rentals
            .record_refund(rental.id, refund_id, payment_status)
            .await?
        {
            Some(recorded) => Ok(recorded),
            None => self
                .rentals
                .get_by_id(rental.id)
                .await?
                .ok_or(RentalActionError::NotFound),
        }
    }

    /// Refund `payment_intent`, the whole amount when `amount_cents` is None
    async fn create_refund(
        &self,
        rental_id: Uuid,
        payment_intent: &str,
        amount_cents: Option<i64>,
        idempotency_key: String,
    ) -> Result<String, RentalActionError> {
        let stripe = self
            .stripe
            .as_ref()
            .ok_or(RentalActionError::PaymentsUnavailable)?;
        let payment_intent: PaymentIntentId = payment_intent
            .parse()
            .context("Invalid payment intent id")?;

        let mut params = CreateRefund::new();
        params.payment_intent = Some(payment_intent);
        params.amount = amount_cents;
        params.metadata = Some(HashMap::from([(
            "rental_id".to_string(),
            rental_id.to_string(),
        )]));

        let client = stripe.idempotent_client(idempotency_key);
        match Refund::create(&client, params).await {
            Ok(refund) => {
                metrics::counter!("rentals.refunded").increment(1);
                info!(
                    rental_id = %rental_id,
                    refund_id = %refund.id,
                    amount_cents = refund.amount,
                    "Issued refund"
                );
                Ok(refund.id.to_string())
            }
            Err(e) => {
                error!(rental_id = %rental_id, error = %e, "Failed to issue refund");
                metrics::counter!("stripe.api.errors").increment(1);
                Err(RentalActionError::Stripe(e.to_string()))
            }
        }
    }

    /// Issue refunds reserved by cancellations whose Stripe call failed
    pub async fn retry_refunds(&self) -> anyhow::Result<usize> {
        if self.stripe.is_none() {
            return Ok(0);
        }

        let mut refunded = 0;
        for rental in self.rentals.find_unrefunded().await? {
            match self.complete_refund(&rental).await {
                Ok(_) => refunded += 1,
                Err(e) => warn!(rental_id = %rental.id, error = %e, "Refund retry failed"),
            }
        }
        Ok(refunded)
    }

    /// Open a Stripe Checkout session for an approved rental
    pub async fn start_checkout(
        &self,
        rental_id: Uuid,
        user: &User,
    ) -> Result<CheckoutLink, RentalActionError> {
        let stripe = self
            .stripe
            .as_ref()
            .ok_or(RentalActionError::PaymentsUnavailable)?;

        let (rental, _) = self.load_for(rental_id, user).await?;
        if rental.customer_id != user.id {
            return Err(RentalActionError::NotCustomer);
        }
        if rental.status != RentalStatus::Approved || !rental.payment_status.accepts_checkout() {
            return Err(RentalActionError::Transition(TransitionError::Conflict {
                expected: RentalStatus::Approved,
            }));
        }

        let car = CarsRepository::new(self.pool.clone())
            .get_by_id(rental.car_id)
            .await?
            .context("Rental car no longer exists")?;
        let currency: Currency = rental
            .currency
            .parse()
            .map_err(|_| anyhow::anyhow!("Unsupported currency {}", rental.currency))?;

        let rental_ref = rental.id.to_string();
        let success_url = format!("{}/rentals/{}?checkout=success", self.base_url, rental.id);
        let cancel_url = format!("{}/rentals/{}?checkout=cancelled", self.base_url, rental.id);
        let metadata = HashMap::from([("rental_id".to_string(), rental_ref.clone())]);

        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.mode = Some(CheckoutSessionMode::Payment);
        params.client_reference_id = Some(&rental_ref);
        params.metadata = Some(metadata.clone());
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: car.display_name(),
                    description: Some(format!(
                        "{} to {} ({} days)",
                        rental.start_date, rental.end_date, rental.days
                    )),
                    ..Default::default()
                }),
                unit_amount: Some(rental.subtotal_cents as i64),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]);
        // Owner payouts are separate transfers, grouped under the rental
        params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
            transfer_group: Some(rental_ref.clone()),
            metadata: Some(metadata),
            ..Default::default()
        });

        let session = match CheckoutSession::create(&stripe.client, params).await {
            Ok(session) => session,
            Err(e) => {
                error!(rental_id = %rental.id, error = %e, "Failed to create checkout session");
                metrics::counter!("stripe.api.errors").increment(1);
                return Err(RentalActionError::Stripe(e.to_string()));
            }
        };

        let session_id = session.id.to_string();
        self.rentals
            .set_checkout_session(rental.id, session_id.clone())
            .await?
            .ok_or(TransitionError::Conflict {
                expected: RentalStatus::Approved,
            })?;

        metrics::counter!("stripe.checkout.created").increment(1);
        info!(rental_id = %rental.id, session_id = %session_id, "Created checkout session");

        Ok(CheckoutLink {
            session_id,
            url: session.url.unwrap_or_default(),
        })
    }

    /// Record a completed checkout.
    ///
    /// Only the rental's current session can pay for it. Any other payment,
    /// whether from a superseded session, a second session, or a session that
    /// completed after the rental was cancelled, is refunded in full and
    /// leaves the rental's amounts alone.
    pub async fn settle_checkout(
        &self,
        rental_id: Uuid,
        session_id: &str,
        payment_intent_id: Option<String>,
    ) -> anyhow::Result<()> {
        let Some(rental) = self.rentals.get_by_id(rental_id).await? else {
            warn!(rental_id = %rental_id, "Checkout completed for unknown rental");
            return Ok(());
        };

        if payment_intent_id.is_some() && rental.stripe_payment_intent_id == payment_intent_id {
            return Ok(());
        }

        if rental.stripe_checkout_session_id.as_deref() == Some(session_id)
            && let Some(paid) = self
                .rentals
                .mark_paid(rental.id, session_id.to_string(), payment_intent_id.clone())
                .await?
        {
            metrics::counter!("rentals.paid").increment(1);
            info!(rental_id = %paid.id, session_id = %session_id, "Rental paid");
            return Ok(());
        }

        let Some(payment_intent_id) = payment_intent_id else {
            warn!(
                rental_id = %rental.id,
                session_id = %session_id,
                "Surplus checkout has no payment intent to refund"
            );
            return Ok(());
        };

        warn!(
            rental_id = %rental.id,
            status = %rental.status,
            session_id = %session_id,
            payment_intent_id = %payment_intent_id,
            "Payment does not belong to the rental's checkout, refunding"
        );
        let refund_id = self
            .create_refund(
                rental.id,
                &payment_intent_id,
                None,
                format!("refund-{}", payment_intent_id),
            )
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if rental.status == RentalStatus::Cancelled && rental.stripe_payment_intent_id.is_none() {
            self.rentals
                .record_refunded_payment(rental.id, payment_intent_id, refund_id)
                .await?;
        }

        Ok(())
    }

    /// Cancel bookings that were never approved or never paid by their start date
    pub async fn expire_stale(&self, today: NaiveDate) -> anyhow::Result<usize> {
        let stale = self.rentals.find_stale(today).await?;
        let now = Utc::now();
        let mut expired = 0;

        for rental in stale {
            let changes = expiry_changes(&rental, &self.refund_policy, now);
            match self
                .rentals
                .transition(rental.id, rental.status, RentalStatus::Cancelled, changes)
                .await?
            {
                Some(_) => {
                    expired += 1;
                    info!(
                        rental_id = %rental.id,
                        from = %rental.status,
                        start_date = %rental.start_date,
                        "Expired stale booking"
                    );
                }
                None => {
                    warn!(rental_id = %rental.id, "Rental changed during sweep, skipping");
                }
            }
        }

        if expired > 0 {
            metrics::counter!("rentals.expired").increment(expired as u64);
        }
        Ok(expired)
    }
}

/// Columns written when the sweep cancels an unpaid booking
fn expiry_changes(rental: &Rental, policy: &RefundPolicy, now: DateTime<Utc>) -> RentalChanges {
    let quote = policy.quote(rental, RentalActor::Admin, now);
    let mut changes = RentalChanges::stamped(RentalStatus::Cancelled, now).with_refund(&quote, None);
    changes.cancellation_reason = Some(EXPIRED_REASON.to_string());
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rentals::{Commission, RentalQuote};

    fn pending_checkout_rental() -> Rental {
        let start = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 7, 3).unwrap();
        let quote = RentalQuote::compute(start, end, 6_000, Commission::new(1000).unwrap()).unwrap();
        Rental {
            id: Uuid::now_v7(),
            car_id: Uuid::now_v7(),
            customer_id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            start_date: start,
            end_date: end,
            days: quote.days,
            daily_rate_cents: quote.daily_rate_cents,
            subtotal_cents: quote.subtotal_cents,
            commission_cents: quote.commission_cents,
            owner_payout_cents: quote.owner_payout_cents,
            currency: "usd".to_string(),
            status: RentalStatus::Approved,
            payment_status: PaymentStatus::Pending,
            stripe_checkout_session_id: Some("cs_test_123".to_string()),
            stripe_payment_intent_id: None,
            stripe_refund_id: None,
            refund_amount_cents: 0,
            customer_note: None,
            rejection_reason: None,
            cancellation_reason: None,
            cancelled_by: None,
            approved_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_expiry_changes_release_open_checkout() {
        let rental = pending_checkout_rental();
        let now = Utc::now();
        let changes = expiry_changes(&rental, &RefundPolicy::default(), now);

        assert_eq!(changes.cancellation_reason.as_deref(), Some(EXPIRED_REASON));
        assert_eq!(changes.cancelled_at, Some(now));
        assert_eq!(changes.payment_status, Some(PaymentStatus::Unpaid));
        assert_eq!(changes.refund_amount_cents, Some(0));
        assert!(changes.stripe_refund_id.is_none());
        assert!(changes.cancelled_by.is_none());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (RentalActionError::NotFound, StatusCode::NOT_FOUND),
            (
                RentalActionError::Transition(TransitionError::PaymentRequired),
                StatusCode::CONFLICT,
            ),
            (
                RentalActionError::Transition(TransitionError::Forbidden {
                    to: RentalStatus::Approved,
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                RentalActionError::PaymentsUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RentalActionError::Stripe("card declined".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
