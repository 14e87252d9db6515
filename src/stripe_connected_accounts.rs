use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An owner's Stripe Express account, the destination of withdrawal transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConnectedAccount {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub stripe_account_id: String,
    pub onboarding_complete: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StripeConnectedAccount {
    pub fn can_receive_transfers(&self) -> bool {
        self.onboarding_complete && self.payouts_enabled
    }
}

/// Diesel model for the stripe_connected_accounts table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::stripe_connected_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StripeConnectedAccountModel {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub stripe_account_id: String,
    pub onboarding_complete: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stripe_connected_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewStripeConnectedAccount {
    pub owner_id: Uuid,
    pub stripe_account_id: String,
}

/// Capability flags reported by Stripe on `account.updated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountFlags {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

impl AccountFlags {
    pub fn onboarding_complete(&self) -> bool {
        self.charges_enabled && self.details_submitted
    }
}

impl From<StripeConnectedAccountModel> for StripeConnectedAccount {
    fn from(model: StripeConnectedAccountModel) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            stripe_account_id: model.stripe_account_id,
            onboarding_complete: model.onboarding_complete,
            charges_enabled: model.charges_enabled,
            payouts_enabled: model.payouts_enabled,
            details_submitted: model.details_submitted,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onboarding_needs_charges_and_details() {
        let mut flags = AccountFlags {
            charges_enabled: true,
            ..Default::default()
        };
        assert!(!flags.onboarding_complete());
        flags.details_submitted = true;
        assert!(flags.onboarding_complete());
    }
}
