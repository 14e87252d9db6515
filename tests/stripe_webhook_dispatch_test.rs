mod common;

use chrono::Utc;
use common::{
    PgPool, approved_rental, create_available_car, create_user, pay_rental, setup_test_db,
};
use serial_test::serial;
use uuid::Uuid;

use miride::AppConfig;
use miride::actions::{WebhookAction, apply_webhook_action};
use miride::rentals::{PaymentStatus, RefundQuote, RentalChanges, RentalStatus};
use miride::rentals_repo::RentalsRepository;
use miride::stripe_connected_accounts::{AccountFlags, NewStripeConnectedAccount};
use miride::stripe_connected_accounts_repo::StripeConnectedAccountsRepository;
use miride::users::UserRole;
use miride::web::AppState;
use miride::withdrawals::WithdrawalStatus;
use miride::withdrawals_repo::WithdrawalsRepository;

/// App state without Stripe: anything that would call the Stripe API fails
fn app_state(pool: &PgPool) -> AppState {
    AppState {
        pool: pool.clone(),
        config: AppConfig::from_lookup("test-secret".to_string(), |_| None).unwrap(),
        stripe_config: None,
    }
}

fn checkout_completed(rental_id: Uuid, session_id: &str, payment_intent_id: &str) -> WebhookAction {
    WebhookAction::CheckoutCompleted {
        rental_id,
        session_id: session_id.to_string(),
        payment_intent_id: Some(payment_intent_id.to_string()),
    }
}

#[tokio::test]
#[serial]
async fn test_checkout_completed_pays_current_session() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let state = app_state(&pool);
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "WEB1", 10_000).await;
    let rental = approved_rental(&pool, &car, &customer, 3, 5).await;
    let repo = RentalsRepository::new(pool.clone());

    repo.set_checkout_session(rental.id, "cs_A".to_string())
        .await
        .unwrap()
        .unwrap();
    apply_webhook_action(&state, checkout_completed(rental.id, "cs_A", "pi_A"))
        .await
        .unwrap();

    let paid = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.stripe_payment_intent_id.as_deref(), Some("pi_A"));

    // Stripe redelivers the same event
    apply_webhook_action(&state, checkout_completed(rental.id, "cs_A", "pi_A"))
        .await
        .unwrap();
    let again = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(again.payment_status, PaymentStatus::Paid);
    assert_eq!(again.updated_at, paid.updated_at);

    // Unknown rentals are acknowledged
    apply_webhook_action(&state, checkout_completed(Uuid::now_v7(), "cs_Z", "pi_Z"))
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_payment_from_superseded_session_is_never_dropped() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let state = app_state(&pool);
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "WEB2", 10_000).await;
    let rental = approved_rental(&pool, &car, &customer, 3, 5).await;
    let repo = RentalsRepository::new(pool.clone());

    // The customer opens a second checkout before paying the first
    repo.set_checkout_session(rental.id, "cs_A".to_string())
        .await
        .unwrap()
        .unwrap();
    repo.set_checkout_session(rental.id, "cs_B".to_string())
        .await
        .unwrap()
        .unwrap();

    // Paying the superseded session needs a refund, which needs Stripe, so the
    // event fails and Stripe delivers it again
    assert!(
        apply_webhook_action(&state, checkout_completed(rental.id, "cs_A", "pi_A"))
            .await
            .is_err()
    );
    let pending = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(pending.payment_status, PaymentStatus::Pending);
    assert!(pending.stripe_payment_intent_id.is_none());

    apply_webhook_action(&state, checkout_completed(rental.id, "cs_B", "pi_B"))
        .await
        .unwrap();
    let paid = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.stripe_payment_intent_id.as_deref(), Some("pi_B"));

    // The first payment still arriving later never replaces the recorded one
    assert!(
        apply_webhook_action(&state, checkout_completed(rental.id, "cs_A", "pi_A"))
            .await
            .is_err()
    );
    let after = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(after.stripe_payment_intent_id.as_deref(), Some("pi_B"));
    assert_eq!(after.subtotal_cents, paid.subtotal_cents);
    assert_eq!(after.owner_payout_cents, paid.owner_payout_cents);
    assert_eq!(after.refund_amount_cents, 0);
}

#[tokio::test]
#[serial]
async fn test_payment_after_partial_refund_keeps_amounts() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let state = app_state(&pool);
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "WEB3", 10_000).await;
    let rental = approved_rental(&pool, &car, &customer, 3, 5).await;
    let paid = pay_rental(&pool, &rental, "first").await;
    let repo = RentalsRepository::new(pool.clone());

    // Half of the 200.00 subtotal refunded, commission rescaled to 10.00
    let quote = RefundQuote {
        refund_cents: 10_000,
        commission_cents: 1_000,
        owner_payout_cents: 9_000,
        payment_status: PaymentStatus::PartiallyRefunded,
    };
    let cancelled = repo
        .transition(
            paid.id,
            RentalStatus::Approved,
            RentalStatus::Cancelled,
            RentalChanges::stamped(RentalStatus::Cancelled, Utc::now())
                .with_refund(&quote, Some("re_first".to_string())),
        )
        .await
        .unwrap()
        .unwrap();

    // A second checkout completing after cancellation must be refunded
    assert!(
        apply_webhook_action(&state, checkout_completed(rental.id, "cs_second", "pi_second"))
            .await
            .is_err()
    );

    let after = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(after.status, RentalStatus::Cancelled);
    assert_eq!(after.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(after.stripe_payment_intent_id.as_deref(), Some("pi_first"));
    assert_eq!(after.stripe_refund_id.as_deref(), Some("re_first"));
    assert_eq!(after.refund_amount_cents, cancelled.refund_amount_cents);
    assert_eq!(after.commission_cents, 1_000);
    assert_eq!(after.owner_payout_cents, 9_000);
}

#[tokio::test]
#[serial]
async fn test_refunded_payment_is_recorded_once_on_unpaid_cancellation() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "WEB4", 10_000).await;
    let rental = approved_rental(&pool, &car, &customer, 3, 5).await;
    let repo = RentalsRepository::new(pool.clone());

    repo.set_checkout_session(rental.id, "cs_late".to_string())
        .await
        .unwrap()
        .unwrap();
    repo.transition(
        rental.id,
        RentalStatus::Approved,
        RentalStatus::Cancelled,
        RentalChanges::stamped(RentalStatus::Cancelled, Utc::now()),
    )
    .await
    .unwrap()
    .unwrap();

    // Cancellation closes the checkout, so a late payment cannot mark it paid
    assert!(
        repo.mark_paid(rental.id, "cs_late".to_string(), Some("pi_late".to_string()))
            .await
            .unwrap()
            .is_none()
    );

    let refunded = repo
        .record_refunded_payment(rental.id, "pi_late".to_string(), "re_late".to_string())
        .await
        .unwrap()
        .expect("unpaid cancellation records the refunded payment");
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(refunded.refund_amount_cents, refunded.subtotal_cents);
    assert_eq!(refunded.commission_cents, 0);
    assert_eq!(refunded.owner_payout_cents, 0);

    assert!(
        repo.record_refunded_payment(rental.id, "pi_other".to_string(), "re_other".to_string())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn test_checkout_expiry_and_failed_payment() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let state = app_state(&pool);
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;
    let car = create_available_car(&pool, &owner, "WEB5", 10_000).await;
    let rental = approved_rental(&pool, &car, &customer, 3, 5).await;
    let repo = RentalsRepository::new(pool.clone());

    repo.set_checkout_session(rental.id, "cs_expiring".to_string())
        .await
        .unwrap()
        .unwrap();

    // Unknown sessions are ignored
    apply_webhook_action(
        &state,
        WebhookAction::CheckoutExpired {
            session_id: "cs_unknown".to_string(),
        },
    )
    .await
    .unwrap();
    let still_pending = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(still_pending.payment_status, PaymentStatus::Pending);

    apply_webhook_action(
        &state,
        WebhookAction::CheckoutExpired {
            session_id: "cs_expiring".to_string(),
        },
    )
    .await
    .unwrap();
    let expired = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(expired.payment_status, PaymentStatus::Unpaid);
    assert_eq!(expired.status, RentalStatus::Approved);

    repo.set_checkout_session(rental.id, "cs_retry".to_string())
        .await
        .unwrap()
        .unwrap();
    apply_webhook_action(
        &state,
        WebhookAction::PaymentFailed {
            rental_id: rental.id,
            payment_intent_id: "pi_declined".to_string(),
        },
    )
    .await
    .unwrap();
    let failed = repo.get_by_id(rental.id).await.unwrap().unwrap();
    assert_eq!(failed.payment_status, PaymentStatus::Failed);

    // A failed payment does not touch a paid rental
    let paid = pay_rental(&pool, &failed, "after_failure").await;
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert!(repo.mark_payment_failed(rental.id).await.unwrap().is_none());
    assert!(repo.expire_checkout_session("cs_after_failure").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_account_sync_and_transfer_reversal() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();
    let state = app_state(&pool);
    let owner = create_user(&pool, "owner@example.com", UserRole::Owner).await;
    let customer = create_user(&pool, "customer@example.com", UserRole::Customer).await;

    let accounts = StripeConnectedAccountsRepository::new(pool.clone());
    accounts
        .create(NewStripeConnectedAccount {
            owner_id: owner.id,
            stripe_account_id: "acct_test_owner".to_string(),
        })
        .await
        .unwrap();

    apply_webhook_action(
        &state,
        WebhookAction::SyncAccount {
            stripe_account_id: "acct_test_owner".to_string(),
            flags: AccountFlags {
                charges_enabled: true,
                payouts_enabled: true,
                details_submitted: true,
            },
        },
    )
    .await
    .unwrap();
    let account = accounts.get_by_owner_id(owner.id).await.unwrap().unwrap();
    assert!(account.onboarding_complete);
    assert!(account.can_receive_transfers());

    // A completed rental funds the withdrawal
    let car = create_available_car(&pool, &owner, "WEB6", 10_000).await;
    let rental = approved_rental(&pool, &car, &customer, 3, 5).await;
    pay_rental(&pool, &rental, "funded").await;
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

    let withdrawals = WithdrawalsRepository::new(pool.clone());
    let pending = withdrawals
        .create_pending(owner.id, 10_000, "usd".to_string())
        .await
        .unwrap();
    withdrawals
        .mark_paid(pending.id, "tr_test_reversed".to_string())
        .await
        .unwrap()
        .unwrap();

    apply_webhook_action(
        &state,
        WebhookAction::TransferReversed {
            transfer_id: "tr_test_reversed".to_string(),
        },
    )
    .await
    .unwrap();
    let listed = withdrawals.list(Some(owner.id), 10).await.unwrap();
    assert_eq!(listed[0].status, WithdrawalStatus::Failed);
    assert_eq!(listed[0].failure_reason.as_deref(), Some("Transfer reversed"));
}
