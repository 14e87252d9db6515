use anyhow::Result;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable};
use uuid::Uuid;

use crate::dashboard::RevenueTotals;
use crate::web::PgPool;
use crate::withdrawals_repo::withdrawn_cents;

#[derive(Clone)]
pub struct DashboardRepository {
    pool: PgPool,
}

impl DashboardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Revenue over one owner's rentals, or the whole marketplace
    pub async fn revenue_totals(&self, owner_id: Option<Uuid>) -> Result<RevenueTotals> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            #[derive(QueryableByName)]
            struct Row {
                #[diesel(sql_type = BigInt)]
                gross_cents: i64,
                #[diesel(sql_type = BigInt)]
                commission_cents: i64,
                #[diesel(sql_type = BigInt)]
                refunded_cents: i64,
            }

            let row = diesel::sql_query(
                "SELECT
                    COALESCE(SUM(subtotal_cents - refund_amount_cents) FILTER (
                        WHERE payment_status IN ('paid', 'partially_refunded', 'refunded')
                    ), 0)::BIGINT AS gross_cents,
                    COALESCE(SUM(commission_cents) FILTER (
                        WHERE payment_status IN ('paid', 'partially_refunded')
                          AND status IN ('approved', 'active', 'completed', 'cancelled')
                    ), 0)::BIGINT AS commission_cents,
                    COALESCE(SUM(refund_amount_cents), 0)::BIGINT AS refunded_cents
                 FROM rentals
                 WHERE $1::UUID IS NULL OR owner_id = $1",
            )
            .bind::<Nullable<diesel::sql_types::Uuid>, _>(owner_id)
            .get_result::<Row>(&mut conn)?;

            Ok(RevenueTotals {
                gross_cents: row.gross_cents,
                commission_cents: row.commission_cents,
                refunded_cents: row.refunded_cents,
            })
        })
        .await?
    }

    /// Every pending or paid withdrawal across all owners
    pub async fn total_withdrawn(&self) -> Result<i64> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            Ok(withdrawn_cents(&mut conn, None)?)
        })
        .await?
    }
}
