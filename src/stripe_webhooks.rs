use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

/// Diesel model for the stripe_webhook_events table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::stripe_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StripeWebhookEventModel {
    pub id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stripe_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewStripeWebhookEvent {
    pub stripe_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Webhook event types the marketplace acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledEvent {
    AccountUpdated,
    CheckoutCompleted,
    CheckoutExpired,
    PaymentFailed,
    TransferReversed,
}

impl HandledEvent {
    pub fn from_type(event_type: &str) -> Option<Self> {
        match event_type {
            "account.updated" => Some(HandledEvent::AccountUpdated),
            "checkout.session.completed" => Some(HandledEvent::CheckoutCompleted),
            "checkout.session.expired" => Some(HandledEvent::CheckoutExpired),
            "payment_intent.payment_failed" => Some(HandledEvent::PaymentFailed),
            "transfer.reversed" => Some(HandledEvent::TransferReversed),
            _ => None,
        }
    }
}
