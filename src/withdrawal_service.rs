//! Paying pending withdrawals out as Stripe transfers.
//!
//! A withdrawal only fails when Stripe definitively refused the transfer.
//! Timeouts, transport errors and server errors leave it pending with its
//! amount reserved, and the hourly sweep retries it under the same
//! idempotency key while Stripe still remembers that key.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use stripe::{CreateTransfer, Currency, StripeError, Transfer};
use tracing::{error, info, warn};

use crate::stripe_client::StripeConfig;
use crate::stripe_connected_accounts_repo::StripeConnectedAccountsRepository;
use crate::web::PgPool;
use crate::withdrawals::Withdrawal;
use crate::withdrawals_repo::WithdrawalsRepository;

/// Stripe keeps idempotency keys for 24 hours; retries stop short of that
pub const RETRY_WINDOW: Duration = Duration::hours(23);

/// Leave in-flight requests alone before retrying them
pub const RETRY_DELAY: Duration = Duration::minutes(10);

#[derive(Debug)]
pub enum PayoutError {
    /// Stripe refused the transfer. The withdrawal is failed and its amount released.
    Rejected(String),
    /// The transfer may or may not exist. The withdrawal stays pending.
    Unconfirmed(String),
    /// The withdrawal was settled by someone else first
    NotPending,
    Internal(anyhow::Error),
}

impl std::fmt::Display for PayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayoutError::Rejected(reason) => write!(f, "Stripe rejected the transfer: {}", reason),
            PayoutError::Unconfirmed(reason) => {
                write!(f, "Stripe transfer could not be confirmed: {}", reason)
            }
            PayoutError::NotPending => write!(f, "Withdrawal is no longer pending"),
            PayoutError::Internal(e) => write!(f, "{:#}", e),
        }
    }
}

impl From<anyhow::Error> for PayoutError {
    fn from(e: anyhow::Error) -> Self {
        PayoutError::Internal(e)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum TransferFailure {
    Rejected(String),
    Unconfirmed(String),
}

#[derive(Clone)]
pub struct WithdrawalService {
    withdrawals: WithdrawalsRepository,
    accounts: StripeConnectedAccountsRepository,
    stripe: Option<StripeConfig>,
}

impl WithdrawalService {
    pub fn new(pool: PgPool, stripe: Option<StripeConfig>) -> Self {
        Self {
            withdrawals: WithdrawalsRepository::new(pool.clone()),
            accounts: StripeConnectedAccountsRepository::new(pool),
            stripe,
        }
    }

    /// Transfer a pending withdrawal to `destination` and record the outcome
    pub async fn pay_out(
        &self,
        withdrawal: &Withdrawal,
        destination: &str,
    ) -> Result<Withdrawal, PayoutError> {
        let Some(stripe) = self.stripe.as_ref() else {
            return Err(PayoutError::Unconfirmed(
                "Stripe is not configured".to_string(),
            ));
        };

        match transfer_to_owner(stripe, withdrawal, destination).await {
            Ok(transfer_id) => match self.withdrawals.mark_paid(withdrawal.id, transfer_id).await {
                Ok(Some(paid)) => {
                    metrics::counter!("withdrawals.paid").increment(1);
                    info!(
                        withdrawal_id = %paid.id,
                        owner_id = %paid.owner_id,
                        amount_cents = paid.amount_cents,
                        "Withdrawal paid"
                    );
                    Ok(paid)
                }
                Ok(None) => {
                    warn!(withdrawal_id = %withdrawal.id, "Withdrawal left pending state before it was paid");
                    Err(PayoutError::NotPending)
                }
                // The transfer went through; the row stays pending and keeps the money reserved
                Err(e) => Err(PayoutError::Internal(
                    e.context("Withdrawal sent but could not be recorded"),
                )),
            },
            Err(TransferFailure::Rejected(reason)) => {
                metrics::counter!("withdrawals.failed").increment(1);
                metrics::counter!("stripe.api.errors").increment(1);
                warn!(withdrawal_id = %withdrawal.id, error = %reason, "Withdrawal transfer rejected");
                if let Err(e) = self.withdrawals.mark_failed(withdrawal.id, &reason).await {
                    error!(withdrawal_id = %withdrawal.id, error = %e, "Failed to record failed withdrawal");
                }
                Err(PayoutError::Rejected(reason))
            }
            Err(TransferFailure::Unconfirmed(reason)) => {
                metrics::counter!("stripe.api.errors").increment(1);
                error!(
                    withdrawal_id = %withdrawal.id,
                    error = %reason,
                    "Withdrawal transfer outcome unknown, leaving it pending"
                );
                Err(PayoutError::Unconfirmed(reason))
            }
        }
    }

    /// Retry transfers for withdrawals still pending after [`RETRY_DELAY`].
    ///
    /// Withdrawals older than [`RETRY_WINDOW`] are only reported: a new
    /// request under an expired idempotency key could pay the owner twice.
    pub async fn retry_pending(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        if self.stripe.is_none() {
            return Ok(0);
        }

        let stuck = self
            .withdrawals
            .find_pending_between(DateTime::<Utc>::UNIX_EPOCH, now - RETRY_WINDOW)
            .await?;
        for withdrawal in &stuck {
            error!(
                withdrawal_id = %withdrawal.id,
                owner_id = %withdrawal.owner_id,
                created_at = %withdrawal.created_at,
                "Withdrawal pending past the retry window, needs manual reconciliation"
            );
        }

        let mut paid = 0;
        let due = self
            .withdrawals
            .find_pending_between(now - RETRY_WINDOW, now - RETRY_DELAY)
            .await?;
        for withdrawal in due {
            let account = match self.accounts.get_by_owner_id(withdrawal.owner_id).await? {
                Some(account) if account.can_receive_transfers() => account,
                _ => {
                    warn!(withdrawal_id = %withdrawal.id, "Owner cannot receive transfers, skipping retry");
                    continue;
                }
            };
            match self.pay_out(&withdrawal, &account.stripe_account_id).await {
                Ok(_) => paid += 1,
                Err(e) => warn!(withdrawal_id = %withdrawal.id, error = %e, "Withdrawal retry failed"),
            }
        }
        Ok(paid)
    }
}

/// Move a pending withdrawal's money to the owner's connected account.
/// The withdrawal id doubles as idempotency key, so a retried request
/// cannot pay twice.
async fn transfer_to_owner(
    stripe_config: &StripeConfig,
    withdrawal: &Withdrawal,
    destination: &str,
) -> Result<String, TransferFailure> {
    let currency: Currency = withdrawal.currency.parse().map_err(|_| {
        TransferFailure::Rejected(format!("Unsupported currency {}", withdrawal.currency))
    })?;
    let withdrawal_id = withdrawal.id.to_string();

    let mut params = CreateTransfer::new(currency, destination.to_string());
    params.amount = Some(withdrawal.amount_cents as i64);
    params.transfer_group = Some(&withdrawal_id);
    params.description = Some("MiRide owner withdrawal");
    params.metadata = Some(HashMap::from([
        ("withdrawal_id".to_string(), withdrawal_id.clone()),
        ("owner_id".to_string(), withdrawal.owner_id.to_string()),
    ]));

    let client = stripe_config.idempotent_client(withdrawal_id.clone());
    let transfer = Transfer::create(&client, params)
        .await
        .map_err(classify_transfer_error)?;
    Ok(transfer.id.to_string())
}

fn classify_transfer_error(e: StripeError) -> TransferFailure {
    match &e {
        StripeError::Stripe(request) if is_definitive_rejection(request.http_status) => {
            TransferFailure::Rejected(e.to_string())
        }
        _ => TransferFailure::Unconfirmed(e.to_string()),
    }
}

/// 4xx answers mean Stripe did not create the transfer. 409 (idempotent
/// request still in flight) and 429 (rate limited) are worth another try.
fn is_definitive_rejection(http_status: u16) -> bool {
    (400..500).contains(&http_status) && http_status != 409 && http_status != 429
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_leave_outcome_unknown() {
        assert!(matches!(
            classify_transfer_error(StripeError::Timeout),
            TransferFailure::Unconfirmed(_)
        ));
        assert!(matches!(
            classify_transfer_error(StripeError::ClientError("connection reset".to_string())),
            TransferFailure::Unconfirmed(_)
        ));
    }

    #[test]
    fn test_definitive_rejections() {
        assert!(is_definitive_rejection(400));
        assert!(is_definitive_rejection(402));
        assert!(is_definitive_rejection(404));
        assert!(!is_definitive_rejection(409));
        assert!(!is_definitive_rejection(429));
        assert!(!is_definitive_rejection(500));
        assert!(!is_definitive_rejection(503));
    }

    #[test]
    fn test_retry_window_stays_inside_idempotency_lifetime() {
        assert!(RETRY_WINDOW < Duration::hours(24));
        assert!(RETRY_DELAY < RETRY_WINDOW);
    }
}
