use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::dsl::sum;
use diesel::prelude::*;
use uuid::Uuid;

use crate::rentals_repo::{earned_cents, pending_earnings_cents};
use crate::web::PgPool;
use crate::withdrawals::{
    NewWithdrawal, OwnerBalance, Withdrawal, WithdrawalModel, WithdrawalStatus,
};

#[derive(Clone)]
pub struct WithdrawalsRepository {
    pool: PgPool,
}

impl WithdrawalsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn balance(&self, owner_id: Uuid) -> Result<OwnerBalance> {
        let pool = self.pool.clone();
        let balance = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let balance = load_balance(&mut conn, owner_id)?;
            Ok::<OwnerBalance, anyhow::Error>(balance)
        })
        .await??;

        Ok(balance)
    }

    /// Insert a pending withdrawal after re-checking the balance.
    ///
    /// The owner's user row is locked first, so two concurrent requests are
    /// serialized and cannot both spend the same balance. A
    /// [`crate::withdrawals::WithdrawalError`] is returned inside the
    /// `anyhow::Error` when the amount is not allowed.
    pub async fn create_pending(
        &self,
        owner_id: Uuid,
        amount_cents: i32,
        currency: String,
    ) -> Result<Withdrawal> {
        use crate::schema::{users, withdrawals};

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<WithdrawalModel, anyhow::Error, _>(|conn| {
                users::table
                    .filter(users::id.eq(owner_id))
                    .select(users::id)
                    .for_update()
                    .first::<Uuid>(conn)?;

                let balance = load_balance(conn, owner_id)?;
                balance.check_withdrawal(amount_cents)?;

                let inserted: WithdrawalModel = diesel::insert_into(withdrawals::table)
                    .values(&NewWithdrawal {
                        owner_id,
                        amount_cents,
                        currency,
                    })
                    .returning(WithdrawalModel::as_returning())
                    .get_result(conn)?;

                Ok(inserted)
            })
        })
        .await??;

        Ok(result.into())
    }

    pub async fn mark_paid(
        &self,
        withdrawal_id: Uuid,
        stripe_transfer_id: String,
    ) -> Result<Option<Withdrawal>> {
        use crate::schema::withdrawals;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<WithdrawalModel> = diesel::update(withdrawals::table)
                .filter(withdrawals::id.eq(withdrawal_id))
                .filter(withdrawals::status.eq(WithdrawalStatus::Pending))
                .set((
                    withdrawals::status.eq(WithdrawalStatus::Paid),
                    withdrawals::stripe_transfer_id.eq(Some(stripe_transfer_id)),
                    withdrawals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(WithdrawalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<WithdrawalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Fail a pending withdrawal, releasing its amount back to the balance
    pub async fn mark_failed(&self, withdrawal_id: Uuid, reason: &str) -> Result<Option<Withdrawal>> {
        use crate::schema::withdrawals;

        let pool = self.pool.clone();
        let reason = reason.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<WithdrawalModel> = diesel::update(withdrawals::table)
                .filter(withdrawals::id.eq(withdrawal_id))
                .filter(withdrawals::status.eq(WithdrawalStatus::Pending))
                .set((
                    withdrawals::status.eq(WithdrawalStatus::Failed),
                    withdrawals::failure_reason.eq(Some(reason)),
                    withdrawals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(WithdrawalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<WithdrawalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// A paid transfer was reversed on the Stripe side
    pub async fn mark_reversed(&self, stripe_transfer_id: &str) -> Result<Option<Withdrawal>> {
        use crate::schema::withdrawals;

        let pool = self.pool.clone();
        let stripe_transfer_id = stripe_transfer_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<WithdrawalModel> = diesel::update(withdrawals::table)
                .filter(withdrawals::stripe_transfer_id.eq(&stripe_transfer_id))
                .filter(withdrawals::status.eq(WithdrawalStatus::Paid))
                .set((
                    withdrawals::status.eq(WithdrawalStatus::Failed),
                    withdrawals::failure_reason.eq(Some("Transfer reversed")),
                    withdrawals::updated_at.eq(diesel::dsl::now),
                ))
                .returning(WithdrawalModel::as_returning())
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<WithdrawalModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Withdrawals newest first, for one owner or everyone
    pub async fn list(&self, owner_id: Option<Uuid>, limit: i64) -> Result<Vec<Withdrawal>> {
        use crate::schema::withdrawals::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = dsl::withdrawals
                .select(WithdrawalModel::as_select())
                .into_boxed();
            if let Some(owner_id) = owner_id {
                query = query.filter(dsl::owner_id.eq(owner_id));
            }

            let withdrawals: Vec<WithdrawalModel> = query
                .order_by(dsl::created_at.desc())
                .limit(limit)
                .load(&mut conn)?;

            Ok::<Vec<WithdrawalModel>, anyhow::Error>(withdrawals)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Pending withdrawals created in `[since, before)`, oldest first
    pub async fn find_pending_between(
        &self,
        since: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Withdrawal>> {
        use crate::schema::withdrawals::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let withdrawals: Vec<WithdrawalModel> = dsl::withdrawals
                .filter(dsl::status.eq(WithdrawalStatus::Pending))
                .filter(dsl::created_at.ge(since))
                .filter(dsl::created_at.lt(before))
                .order_by(dsl::created_at.asc())
                .select(WithdrawalModel::as_select())
                .load(&mut conn)?;

            Ok::<Vec<WithdrawalModel>, anyhow::Error>(withdrawals)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }
}

/// Pending and paid withdrawals, optionally for a single owner
pub fn withdrawn_cents(conn: &mut PgConnection, owner_id: Option<Uuid>) -> QueryResult<i64> {
    use crate::schema::withdrawals::dsl;

    let mut query = dsl::withdrawals
        .filter(dsl::status.eq_any(WithdrawalStatus::RESERVED.to_vec()))
        .select(sum(dsl::amount_cents))
        .into_boxed();
    if let Some(owner_id) = owner_id {
        query = query.filter(dsl::owner_id.eq(owner_id));
    }

    let withdrawn: Option<i64> = query.first(conn)?;
    Ok(withdrawn.unwrap_or(0))
}

pub fn load_balance(conn: &mut PgConnection, owner_id: Uuid) -> QueryResult<OwnerBalance> {
    let earned = earned_cents(conn, owner_id)?;
    let pending = pending_earnings_cents(conn, owner_id)?;
    let withdrawn = withdrawn_cents(conn, Some(owner_id))?;
    Ok(OwnerBalance::new(earned, pending, withdrawn))
}
