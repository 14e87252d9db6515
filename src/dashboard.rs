use serde::Serialize;
use ts_rs::TS;

use crate::cars::CarStatus;
use crate::rentals::{Rental, RentalStatus};
use crate::users::UserRole;
use crate::withdrawals::OwnerBalance;

/// Money totals over rentals, in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct RevenueTotals {
    /// Charged subtotals minus refunds
    pub gross_cents: i64,
    /// Commission kept by the platform on live or settled rentals
    pub commission_cents: i64,
    pub refunded_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct StatusCount<S> {
    pub status: S,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct OwnerDashboard {
    pub car_count: i64,
    pub rentals_by_status: Vec<StatusCount<RentalStatus>>,
    pub balance: OwnerBalance,
    pub gross_booked_cents: i64,
    pub recent_rentals: Vec<Rental>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
    pub users_by_role: Vec<StatusCount<UserRole>>,
    pub cars_by_status: Vec<StatusCount<CarStatus>>,
    pub rentals_by_status: Vec<StatusCount<RentalStatus>>,
    pub gross_volume_cents: i64,
    pub platform_commission_cents: i64,
    pub total_refunded_cents: i64,
    pub total_withdrawn_cents: i64,
}

/// Expand grouped counts to every status in `all`, filling gaps with zero
pub fn complete_counts<S: Copy + PartialEq>(all: &[S], counts: &[(S, i64)]) -> Vec<StatusCount<S>> {
    all.iter()
        .map(|status| StatusCount {
            status: *status,
            count: counts
                .iter()
                .find(|(s, _)| s == status)
                .map(|(_, count)| *count)
                .unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_counts_fills_missing_statuses() {
        let counts = vec![(RentalStatus::Completed, 4), (RentalStatus::PendingApproval, 2)];
        let full = complete_counts(&RentalStatus::ALL, &counts);

        assert_eq!(full.len(), RentalStatus::ALL.len());
        assert_eq!(full[0].status, RentalStatus::PendingApproval);
        assert_eq!(full[0].count, 2);
        assert_eq!(
            full.iter().map(|c| c.count).sum::<i64>(),
            6,
            "zero rows should not change the total"
        );
        assert_eq!(
            full.iter()
                .find(|c| c.status == RentalStatus::Cancelled)
                .map(|c| c.count),
            Some(0)
        );
    }
}
