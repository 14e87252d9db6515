use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::stripe_connected_accounts::{
    AccountFlags, NewStripeConnectedAccount, StripeConnectedAccount, StripeConnectedAccountModel,
};
use crate::web::PgPool;

#[derive(Clone)]
pub struct StripeConnectedAccountsRepository {
    pool: PgPool,
}

impl StripeConnectedAccountsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connected account for an owner
    pub async fn get_by_owner_id(&self, owner_id: Uuid) -> Result<Option<StripeConnectedAccount>> {
        use crate::schema::stripe_connected_accounts::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let account: Option<StripeConnectedAccountModel> = dsl::stripe_connected_accounts
                .filter(dsl::owner_id.eq(owner_id))
                .select(StripeConnectedAccountModel::as_select())
                .first(&mut conn)
                .optional()?;

            Ok::<Option<StripeConnectedAccountModel>, anyhow::Error>(account)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    pub async fn create(
        &self,
        new_account: NewStripeConnectedAccount,
    ) -> Result<StripeConnectedAccount> {
        use crate::schema::stripe_connected_accounts::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: StripeConnectedAccountModel =
                diesel::insert_into(dsl::stripe_connected_accounts)
                    .values(&new_account)
                    .returning(StripeConnectedAccountModel::as_returning())
                    .get_result(&mut conn)?;

            Ok::<StripeConnectedAccountModel, anyhow::Error>(inserted)
        })
        .await??;

        Ok(result.into())
    }

    /// Sync capability flags from an `account.updated` webhook
    pub async fn update_flags(
        &self,
        stripe_account_id: &str,
        flags: AccountFlags,
    ) -> Result<Option<StripeConnectedAccount>> {
        use crate::schema::stripe_connected_accounts;

        let pool = self.pool.clone();
        let stripe_account_id = stripe_account_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<StripeConnectedAccountModel> =
                diesel::update(stripe_connected_accounts::table)
                    .filter(stripe_connected_accounts::stripe_account_id.eq(&stripe_account_id))
                    .set((
                        stripe_connected_accounts::charges_enabled.eq(flags.charges_enabled),
                        stripe_connected_accounts::payouts_enabled.eq(flags.payouts_enabled),
                        stripe_connected_accounts::details_submitted.eq(flags.details_submitted),
                        stripe_connected_accounts::onboarding_complete
                            .eq(flags.onboarding_complete()),
                        stripe_connected_accounts::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(StripeConnectedAccountModel::as_returning())
                    .get_result(&mut conn)
                    .optional()?;

            Ok::<Option<StripeConnectedAccountModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }
}
