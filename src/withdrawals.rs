//! Owner withdrawals.
//!
//! Customers pay the platform. Each rental's `owner_payout_cents` accrues to
//! the owner once the rental settles, and the owner pulls it out as a Stripe
//! transfer to their connected account.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Smallest amount an owner can withdraw at once
pub const MIN_WITHDRAWAL_CENTS: i32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::WithdrawalStatus")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    #[db_enum(rename = "pending")]
    Pending,
    #[db_enum(rename = "paid")]
    Paid,
    #[db_enum(rename = "failed")]
    Failed,
}

impl WithdrawalStatus {
    /// Statuses that count against the owner's balance
    pub const RESERVED: [WithdrawalStatus; 2] = [WithdrawalStatus::Pending, WithdrawalStatus::Paid];

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Paid => "paid",
            WithdrawalStatus::Failed => "failed",
        }
    }
}

/// API model for withdrawals
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub amount_cents: i32,
    pub currency: String,
    pub status: WithdrawalStatus,
    pub stripe_transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diesel model for the withdrawals table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::withdrawals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WithdrawalModel {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub amount_cents: i32,
    pub currency: String,
    pub status: WithdrawalStatus,
    pub stripe_transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::withdrawals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewWithdrawal {
    pub owner_id: Uuid,
    pub amount_cents: i32,
    pub currency: String,
}

impl From<WithdrawalModel> for Withdrawal {
    fn from(model: WithdrawalModel) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            amount_cents: model.amount_cents,
            currency: model.currency,
            status: model.status,
            stripe_transfer_id: model.stripe_transfer_id,
            failure_reason: model.failure_reason,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// What an owner has earned and what is left to withdraw, in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct OwnerBalance {
    /// Payout from settled rentals
    pub earned_cents: i64,
    /// Payout from paid rentals that have not finished yet
    pub pending_earnings_cents: i64,
    /// Pending and paid withdrawals
    pub withdrawn_cents: i64,
    pub available_cents: i64,
}

impl OwnerBalance {
    pub fn new(earned_cents: i64, pending_earnings_cents: i64, withdrawn_cents: i64) -> Self {
        Self {
            earned_cents,
            pending_earnings_cents,
            withdrawn_cents,
            available_cents: earned_cents - withdrawn_cents,
        }
    }

    pub fn check_withdrawal(&self, amount_cents: i32) -> Result<(), WithdrawalError> {
        if amount_cents <= 0 {
            return Err(WithdrawalError::InvalidAmount);
        }
        if amount_cents < MIN_WITHDRAWAL_CENTS {
            return Err(WithdrawalError::BelowMinimum);
        }
        if amount_cents as i64 > self.available_cents {
            return Err(WithdrawalError::InsufficientBalance {
                available_cents: self.available_cents,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalError {
    InvalidAmount,
    BelowMinimum,
    InsufficientBalance { available_cents: i64 },
    NotConnected,
    PayoutsDisabled,
}

impl std::fmt::Display for WithdrawalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithdrawalError::InvalidAmount => write!(f, "Amount must be greater than 0"),
            WithdrawalError::BelowMinimum => write!(
                f,
                "Minimum withdrawal is {}.{:02}",
                MIN_WITHDRAWAL_CENTS / 100,
                MIN_WITHDRAWAL_CENTS % 100
            ),
            WithdrawalError::InsufficientBalance { available_cents } => write!(
                f,
                "Amount exceeds available balance of {}",
                format_cents(*available_cents)
            ),
            WithdrawalError::NotConnected => {
                write!(f, "Connect a Stripe account before withdrawing")
            }
            WithdrawalError::PayoutsDisabled => {
                write!(f, "Payouts are not enabled on your Stripe account yet")
            }
        }
    }
}

impl std::error::Error for WithdrawalError {}

/// `-1205` formats as `-12.05`
fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_balance_message() {
        // A refund after a withdrawal can leave the balance below zero
        let err = WithdrawalError::InsufficientBalance {
            available_cents: -1_205,
        };
        assert_eq!(err.to_string(), "Amount exceeds available balance of -12.05");

        let err = WithdrawalError::InsufficientBalance {
            available_cents: -5,
        };
        assert_eq!(err.to_string(), "Amount exceeds available balance of -0.05");
    }

    #[test]
    fn test_available_excludes_pending_earnings() {
        let balance = OwnerBalance::new(50_000, 20_000, 15_000);
        assert_eq!(balance.available_cents, 35_000);
        assert_eq!(balance.pending_earnings_cents, 20_000);
    }

    #[test]
    fn test_withdrawal_limits() {
        let balance = OwnerBalance::new(5_000, 0, 0);
        assert_eq!(
            balance.check_withdrawal(0),
            Err(WithdrawalError::InvalidAmount)
        );
        assert_eq!(
            balance.check_withdrawal(999),
            Err(WithdrawalError::BelowMinimum)
        );
        assert!(balance.check_withdrawal(1_000).is_ok());
        assert!(balance.check_withdrawal(5_000).is_ok());
        assert_eq!(
            balance.check_withdrawal(5_001),
            Err(WithdrawalError::InsufficientBalance {
                available_cents: 5_000
            })
        );
    }

    #[test]
    fn test_error_messages_format_cents() {
        let err = WithdrawalError::InsufficientBalance {
            available_cents: 1_205,
        };
        assert_eq!(
            err.to_string(),
            "Amount exceeds available balance of 12.05"
        );
        assert_eq!(
            WithdrawalError::BelowMinimum.to_string(),
            "Minimum withdrawal is 10.00"
        );
    }
}
