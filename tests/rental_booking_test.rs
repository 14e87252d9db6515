mod common;

use chrono::Utc;
use common::{create_available_car, create_user, days_from_today, setup_test_db, today};
use serial_test::serial;

use miride::cars::CarSearch;
use miride::cars_repo::CarsRepository;
use miride::config::AppConfig;
use miride::rental_service::{EXPIRED_REASON, RentalActionError, RentalService};
use miride::rentals::{
    BookingError, Commission, PaymentStatus, RentalChanges, RentalStatus, TransitionError,
};
use miride::rentals_repo::{BookingRequest, RentalsRepository};
use miride::users::UserRole;

fn booking(
    car_id: uuid::Uuid,
    customer_id: uuid::Uuid,
    start_in: i64,
    end_in: i64,
) -> BookingRequest {
    BookingRequest {
        car_id,
        customer_id,
        start_date: days_from_today(start_in),
        end_date: days_from_today(end_in),
        customer_note: None,
        today: today(),
    }
}

fn commission() -> Commission {
    Commission::new(1000).unwrap()
}

fn test_config() -> AppConfig {
    AppConfig::from_lookup("test-secret".to_string(), |_| None).unwrap()
}

#[tokio::test]
#[serial]
async fn test_booking_snapshots_price_and_commission() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "ABC123", 4_999).await;

    let repo = RentalsRepository::new(pool.clone());
    let rental = repo
        .create_booking(booking(car.id, customer.id, 2, 5), commission(), "usd".into())
        .await
        .unwrap();

    assert_eq!(rental.status, RentalStatus::PendingApproval);
    assert_eq!(rental.payment_status, PaymentStatus::Unpaid);
    assert_eq!(rental.owner_id, owner.id);
    assert_eq!(rental.days, 3);
    assert_eq!(rental.subtotal_cents, 14_997);
    assert_eq!(rental.commission_cents, 1_499);
    assert_eq!(rental.owner_payout_cents, 13_498);

    // Later rate changes do not touch the booked price
    CarsRepository::new(pool.clone())
        .update(
            car.id,
            miride::cars::UpdateCar {
                daily_rate_cents: Some(9_999),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let reloaded = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(reloaded.subtotal_cents, 14_997);
}

#[tokio::test]
#[serial]
async fn test_overlapping_booking_is_rejected() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let alice = create_user(&pool, "alice@example.com", UserRole::Customer).await;
    let bob = create_user(&pool, "bob@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "ABC123", 5_000).await;

    let repo = RentalsRepository::new(pool.clone());
    repo.create_booking(booking(car.id, alice.id, 3, 6), commission(), "usd".into())
        .await
        .unwrap();

    let err = repo
        .create_booking(booking(car.id, bob.id, 5, 8), commission(), "usd".into())
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<BookingError>(), Some(&BookingError::Overlap));

    // End dates are exclusive, so a back-to-back booking fits
    let back_to_back = repo
        .create_booking(booking(car.id, bob.id, 6, 8), commission(), "usd".into())
        .await;
    assert!(back_to_back.is_ok(), "{:?}", back_to_back.err());
}

#[tokio::test]
#[serial]
async fn test_cancelled_booking_frees_the_dates() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let alice = create_user(&pool, "alice@example.com", UserRole::Customer).await;
    let bob = create_user(&pool, "bob@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "ABC123", 5_000).await;

    let service = RentalService::new(pool.clone(), &test_config(), None);
    let repo = RentalsRepository::new(pool.clone());
    let first = repo
        .create_booking(booking(car.id, alice.id, 3, 6), commission(), "usd".into())
        .await
        .unwrap();

    let cancelled = service
        .transition(first.id, &alice, RentalStatus::Cancelled, Some("Plans changed".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, RentalStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(alice.id));
    assert_eq!(cancelled.payment_status, PaymentStatus::Unpaid);

    let second = repo
        .create_booking(booking(car.id, bob.id, 3, 6), commission(), "usd".into())
        .await;
    assert!(second.is_ok(), "{:?}", second.err());
}

#[tokio::test]
#[serial]
async fn test_booking_rules() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "ABC123", 5_000).await;
    let repo = RentalsRepository::new(pool.clone());

    let own_car = repo
        .create_booking(booking(car.id, owner.id, 1, 2), commission(), "usd".into())
        .await
        .unwrap_err();
    assert_eq!(own_car.downcast_ref::<BookingError>(), Some(&BookingError::OwnCar));

    let missing = repo
        .create_booking(
            booking(uuid::Uuid::new_v4(), customer.id, 1, 2),
            commission(),
            "usd".into(),
        )
        .await
        .unwrap_err();
    assert_eq!(
        missing.downcast_ref::<BookingError>(),
        Some(&BookingError::CarNotFound)
    );

    let past = repo
        .create_booking(booking(car.id, customer.id, -1, 2), commission(), "usd".into())
        .await
        .unwrap_err();
    assert_eq!(past.downcast_ref::<BookingError>(), Some(&BookingError::StartInPast));

    CarsRepository::new(pool.clone())
        .set_status(car.id, miride::cars::CarStatus::Unavailable)
        .await
        .unwrap();
    let unavailable = repo
        .create_booking(booking(car.id, customer.id, 1, 2), commission(), "usd".into())
        .await
        .unwrap_err();
    assert_eq!(
        unavailable.downcast_ref::<BookingError>(),
        Some(&BookingError::CarUnavailable)
    );
}

#[tokio::test]
#[serial]
async fn test_transition_is_compare_and_set() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "ABC123", 5_000).await;
    let repo = RentalsRepository::new(pool.clone());

    let rental = repo
        .create_booking(booking(car.id, customer.id, 1, 3), commission(), "usd".into())
        .await
        .unwrap();

    let approved = repo
        .transition(
            rental.id,
            RentalStatus::PendingApproval,
            RentalStatus::Approved,
            RentalChanges::stamped(RentalStatus::Approved, Utc::now()),
        )
        .await
        .unwrap()
        .expect("first writer wins");
    assert!(approved.approved_at.is_some());

    // A second writer still expecting pending_approval loses
    let stale = repo
        .transition(
            rental.id,
            RentalStatus::PendingApproval,
            RentalStatus::Rejected,
            RentalChanges::stamped(RentalStatus::Rejected, Utc::now()),
        )
        .await
        .unwrap();
    assert!(stale.is_none());
    assert_eq!(
        repo.get_by_id(rental.id).await.unwrap().unwrap().status,
        RentalStatus::Approved
    );
}

#[tokio::test]
#[serial]
async fn test_service_enforces_actor_and_payment() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let stranger = create_user(&pool, "stranger@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "ABC123", 5_000).await;

    let service = RentalService::new(pool.clone(), &test_config(), None);
    let rental = RentalsRepository::new(pool.clone())
        .create_booking(booking(car.id, customer.id, 1, 3), commission(), "usd".into())
        .await
        .unwrap();

    let err = service
        .transition(rental.id, &customer, RentalStatus::Approved, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RentalActionError::Transition(TransitionError::Forbidden { .. })
    ));

    let err = service
        .transition(rental.id, &stranger, RentalStatus::Cancelled, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RentalActionError::NotFound));

    service
        .transition(rental.id, &owner, RentalStatus::Approved, None)
        .await
        .unwrap();

    // Not paid yet, so the owner cannot hand over the car
    let err = service
        .transition(rental.id, &owner, RentalStatus::Active, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RentalActionError::Transition(_)));

    // Checkout needs Stripe
    let err = service.start_checkout(rental.id, &customer).await.unwrap_err();
    assert!(matches!(err, RentalActionError::PaymentsUnavailable));
}

#[tokio::test]
#[serial]
async fn test_search_excludes_cars_booked_in_window() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let booked = create_available_car(&pool, &owner, "BOOKED1", 5_000).await;
    let free = create_available_car(&pool, &owner, "FREE1", 7_000).await;

    RentalsRepository::new(pool.clone())
        .create_booking(booking(booked.id, customer.id, 2, 5), commission(), "usd".into())
        .await
        .unwrap();

    let cars_repo = CarsRepository::new(pool.clone());
    let results = cars_repo
        .search(CarSearch {
            location: Some("austin".to_string()),
            available_between: Some((days_from_today(4), days_from_today(6))),
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    let ids: Vec<_> = results.iter().map(|car| car.id).collect();
    assert_eq!(ids, vec![free.id]);

    let cheap = cars_repo
        .search(CarSearch {
            max_daily_rate_cents: Some(6_000),
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(cheap.len(), 1);
    assert_eq!(cheap[0].id, booked.id);
}

#[tokio::test]
#[serial]
async fn test_stale_bookings_expire() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "ABC123", 5_000).await;
    let repo = RentalsRepository::new(pool.clone());
    let service = RentalService::new(pool.clone(), &test_config(), None);

    let pending = repo
        .create_booking(booking(car.id, customer.id, 1, 2), commission(), "usd".into())
        .await
        .unwrap();
    let later = repo
        .create_booking(booking(car.id, customer.id, 10, 12), commission(), "usd".into())
        .await
        .unwrap();

    assert_eq!(service.expire_stale(today()).await.unwrap(), 0);

    // Two days on, the first booking started without approval
    let expired = service.expire_stale(days_from_today(2)).await.unwrap();
    assert_eq!(expired, 1);

    let pending = repo.get_by_id(pending.id).await.unwrap().unwrap();
    assert_eq!(pending.status, RentalStatus::Cancelled);
    assert_eq!(pending.cancellation_reason.as_deref(), Some(EXPIRED_REASON));
    assert!(pending.cancelled_at.is_some());

    let later = repo.get_by_id(later.id).await.unwrap().unwrap();
    assert_eq!(later.status, RentalStatus::PendingApproval);
}
