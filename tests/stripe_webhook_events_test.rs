mod common;

use common::setup_test_db;
use serde_json::json;
use serial_test::serial;

use miride::stripe_webhooks::NewStripeWebhookEvent;
use miride::stripe_webhooks_repo::StripeWebhookEventsRepository;

fn event(id: &str) -> NewStripeWebhookEvent {
    NewStripeWebhookEvent {
        stripe_event_id: id.to_string(),
        event_type: "checkout.session.completed".to_string(),
        payload: json!({ "id": id, "type": "checkout.session.completed" }),
    }
}

#[tokio::test]
#[serial]
async fn test_redelivered_event_is_recorded_once() {
    let test_db = setup_test_db().await;
    let repo = StripeWebhookEventsRepository::new(test_db.pool());

    repo.record(event("evt_1")).await.unwrap();
    repo.record(event("evt_1")).await.unwrap();
    assert!(!repo.is_processed("evt_1").await.unwrap());

    repo.mark_processed("evt_1").await.unwrap();
    assert!(repo.is_processed("evt_1").await.unwrap());

    // A redelivery after processing does not reset the flag
    repo.record(event("evt_1")).await.unwrap();
    assert!(repo.is_processed("evt_1").await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_failed_event_stays_unprocessed() {
    let test_db = setup_test_db().await;
    let repo = StripeWebhookEventsRepository::new(test_db.pool());

    repo.record(event("evt_2")).await.unwrap();
    repo.mark_failed("evt_2", "database unavailable").await.unwrap();
    assert!(!repo.is_processed("evt_2").await.unwrap());

    // The retry succeeds
    repo.mark_processed("evt_2").await.unwrap();
    assert!(repo.is_processed("evt_2").await.unwrap());

    assert!(!repo.is_processed("evt_unknown").await.unwrap());
}
