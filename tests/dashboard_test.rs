mod common;

use chrono::Utc;
use common::{
    PgPool, approved_rental, create_available_car, create_user, pay_rental, setup_test_db,
};
use serial_test::serial;

use miride::actions::{load_admin_dashboard, load_owner_dashboard};
use miride::dashboard::StatusCount;
use miride::dashboard_repo::DashboardRepository;
use miride::rentals::{
    PaymentStatus, RefundPolicy, Rental, RentalActor, RentalChanges, RentalStatus,
};
use miride::rentals_repo::RentalsRepository;
use miride::users::{User, UserRole};
use miride::withdrawals_repo::WithdrawalsRepository;

fn count_of<S: PartialEq>(counts: &[StatusCount<S>], status: S) -> i64 {
    counts
        .iter()
        .find(|entry| entry.status == status)
        .map(|entry| entry.count)
        .unwrap_or(0)
}

async fn completed_rental(pool: &PgPool, owner: &User, customer: &User, plate: &str) -> Rental {
    let car = create_available_car(pool, owner, plate, 10_000).await;
    let rental = approved_rental(pool, &car, customer, 1, 3).await;
    pay_rental(pool, &rental, plate).await;

    let repo = RentalsRepository::new(pool.clone());
    for (from, to) in [
        (RentalStatus::Approved, RentalStatus::Active),
        (RentalStatus::Active, RentalStatus::Completed),
    ] {
        repo.transition(rental.id, from, to, RentalChanges::stamped(to, Utc::now()))
            .await
            .unwrap()
            .unwrap();
    }
    repo.get_by_id(rental.id).await.unwrap().unwrap()
}

/// Paid, then cancelled late by the customer with half refunded
async fn half_refunded_rental(pool: &PgPool, owner: &User, customer: &User, plate: &str) -> Rental {
    let car = create_available_car(pool, owner, plate, 10_000).await;
    let rental = approved_rental(pool, &car, customer, 1, 3).await;
    let paid = pay_rental(pool, &rental, plate).await;

    let now = Utc::now();
    let quote = RefundPolicy::default().quote(&paid, RentalActor::Customer, now);
    let repo = RentalsRepository::new(pool.clone());
    repo.transition(
        paid.id,
        RentalStatus::Approved,
        RentalStatus::Cancelled,
        RentalChanges::stamped(RentalStatus::Cancelled, now).with_reserved_refund(&quote),
    )
    .await
    .unwrap()
    .unwrap();
    repo.record_refund(
        paid.id,
        format!("re_{}", plate),
        PaymentStatus::PartiallyRefunded,
    )
    .await
    .unwrap()
    .unwrap()
}

#[tokio::test]
#[serial]
async fn test_revenue_totals_per_owner_and_marketplace() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let other_owner = create_user(&pool, "other@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let dashboard = DashboardRepository::new(pool.clone());

    let empty = dashboard.revenue_totals(None).await.unwrap();
    assert_eq!(empty.gross_cents, 0);
    assert_eq!(empty.commission_cents, 0);
    assert_eq!(empty.refunded_cents, 0);

    completed_rental(&pool, &owner, &customer, "DASH1").await;
    let refunded = half_refunded_rental(&pool, &owner, &customer, "DASH2").await;
    assert_eq!(refunded.refund_amount_cents, 10_000);
    assert_eq!(refunded.commission_cents, 1_000);

    // Approved but unpaid bookings bring in nothing yet
    let car = create_available_car(&pool, &other_owner, "DASH3", 10_000).await;
    approved_rental(&pool, &car, &customer, 1, 3).await;

    let totals = dashboard.revenue_totals(Some(owner.id)).await.unwrap();
    assert_eq!(totals.gross_cents, 30_000);
    assert_eq!(totals.commission_cents, 3_000);
    assert_eq!(totals.refunded_cents, 10_000);

    let other = dashboard.revenue_totals(Some(other_owner.id)).await.unwrap();
    assert_eq!(other.gross_cents, 0);
    assert_eq!(other.commission_cents, 0);

    let marketplace = dashboard.revenue_totals(None).await.unwrap();
    assert_eq!(marketplace.gross_cents, 30_000);
    assert_eq!(marketplace.commission_cents, 3_000);
    assert_eq!(marketplace.refunded_cents, 10_000);
}

#[tokio::test]
#[serial]
async fn test_owner_and_admin_dashboards() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    create_user(&pool, "admin@example.com", UserRole::Admin).await;

    completed_rental(&pool, &owner, &customer, "DASH4").await;
    half_refunded_rental(&pool, &owner, &customer, "DASH5").await;
    WithdrawalsRepository::new(pool.clone())
        .create_pending(owner.id, 5_000, "usd".to_string())
        .await
        .unwrap();

    let owner_view = load_owner_dashboard(pool.clone(), owner.id).await.unwrap();
    assert_eq!(owner_view.car_count, 2);
    assert_eq!(owner_view.gross_booked_cents, 30_000);
    // 180.00 from the completed rental plus 90.00 kept from the cancelled one
    assert_eq!(owner_view.balance.earned_cents, 27_000);
    assert_eq!(owner_view.balance.withdrawn_cents, 5_000);
    assert_eq!(owner_view.balance.available_cents, 22_000);
    assert_eq!(
        count_of(&owner_view.rentals_by_status, RentalStatus::Completed),
        1
    );
    assert_eq!(
        count_of(&owner_view.rentals_by_status, RentalStatus::Cancelled),
        1
    );
    assert_eq!(
        count_of(&owner_view.rentals_by_status, RentalStatus::PendingApproval),
        0
    );
    assert_eq!(owner_view.recent_rentals.len(), 2);

    let customer_view = load_owner_dashboard(pool.clone(), customer.id).await.unwrap();
    assert_eq!(customer_view.car_count, 0);
    assert!(customer_view.recent_rentals.is_empty());

    let admin_view = load_admin_dashboard(pool.clone()).await.unwrap();
    assert_eq!(count_of(&admin_view.users_by_role, UserRole::Owner), 1);
    assert_eq!(count_of(&admin_view.users_by_role, UserRole::Customer), 1);
    assert_eq!(count_of(&admin_view.users_by_role, UserRole::Admin), 1);
    assert_eq!(
        count_of(&admin_view.rentals_by_status, RentalStatus::Completed),
        1
    );
    assert_eq!(admin_view.gross_volume_cents, 30_000);
    assert_eq!(admin_view.platform_commission_cents, 3_000);
    assert_eq!(admin_view.total_refunded_cents, 10_000);
    assert_eq!(admin_view.total_withdrawn_cents, 5_000);
}
