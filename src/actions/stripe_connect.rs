use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::collections::HashMap;
use stripe::{
    Account, AccountLink, AccountLinkType, AccountType, CreateAccount, CreateAccountCapabilities,
    CreateAccountCapabilitiesTransfers, CreateAccountLink, Event, EventObject, LoginLink, Webhook,
};
use tracing::{error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::auth::OwnerUser;
use crate::rentals_repo::RentalsRepository;
use crate::stripe_client::StripeConfig;
use crate::stripe_connected_accounts::{
    AccountFlags, NewStripeConnectedAccount, StripeConnectedAccount,
};
use crate::stripe_connected_accounts_repo::StripeConnectedAccountsRepository;
use crate::stripe_webhooks::{HandledEvent, NewStripeWebhookEvent};
use crate::stripe_webhooks_repo::StripeWebhookEventsRepository;
use crate::web::AppState;
use crate::withdrawals_repo::WithdrawalsRepository;

use super::{DataResponse, json_error};

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct StripeOnboardingResponse {
    pub url: String,
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct StripeConnectStatusView {
    pub connected: bool,
    pub onboarding_complete: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub stripe_account_id: Option<String>,
}

impl From<Option<StripeConnectedAccount>> for StripeConnectStatusView {
    fn from(account: Option<StripeConnectedAccount>) -> Self {
        match account {
            Some(account) => Self {
                connected: true,
                onboarding_complete: account.onboarding_complete,
                charges_enabled: account.charges_enabled,
                payouts_enabled: account.payouts_enabled,
                details_submitted: account.details_submitted,
                stripe_account_id: Some(account.stripe_account_id),
            },
            None => Self {
                connected: false,
                onboarding_complete: false,
                charges_enabled: false,
                payouts_enabled: false,
                details_submitted: false,
                stripe_account_id: None,
            },
        }
    }
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct StripeDashboardLinkResponse {
    pub url: String,
}

fn stripe_unavailable() -> axum::response::Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "Stripe is not configured").into_response()
}

/// POST /owner/stripe/onboard
///
/// Creates an Express account for the owner, or hands out a fresh
/// onboarding link for one that never finished.
pub async fn start_onboarding(owner: OwnerUser, State(state): State<AppState>) -> impl IntoResponse {
    let Some(stripe_config) = state.stripe_config.clone() else {
        return stripe_unavailable();
    };
    let owner = owner.0;
    let repo = StripeConnectedAccountsRepository::new(state.pool.clone());

    let account_id: stripe::AccountId = match repo.get_by_owner_id(owner.id).await {
        Ok(Some(existing)) if existing.onboarding_complete => {
            return json_error(
                StatusCode::CONFLICT,
                "Stripe account is already connected",
            )
            .into_response();
        }
        Ok(Some(existing)) => match existing.stripe_account_id.parse() {
            Ok(id) => id,
            Err(e) => {
                error!(owner_id = %owner.id, error = %e, "Invalid Stripe account ID in database");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Invalid Stripe account configuration",
                )
                .into_response();
            }
        },
        Ok(None) => {
            let mut create_params = CreateAccount::new();
            create_params.type_ = Some(AccountType::Express);
            create_params.email = Some(&owner.email);
            create_params.capabilities = Some(CreateAccountCapabilities {
                transfers: Some(CreateAccountCapabilitiesTransfers {
                    requested: Some(true),
                }),
                ..Default::default()
            });
            create_params.metadata = Some(HashMap::from([(
                "owner_id".to_string(),
                owner.id.to_string(),
            )]));

            let account = match Account::create(&stripe_config.client, create_params).await {
                Ok(account) => account,
                Err(e) => {
                    error!(owner_id = %owner.id, error = %e, "Failed to create Stripe Express account");
                    metrics::counter!("stripe.api.errors").increment(1);
                    return json_error(StatusCode::BAD_GATEWAY, "Failed to create Stripe account")
                        .into_response();
                }
            };

            let new_account = NewStripeConnectedAccount {
                owner_id: owner.id,
                stripe_account_id: account.id.to_string(),
            };
            if let Err(e) = repo.create(new_account).await {
                error!(owner_id = %owner.id, error = %e, "Failed to store Stripe connected account");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to store Stripe account",
                )
                .into_response();
            }

            metrics::counter!("stripe.connect.onboarding_started").increment(1);
            info!(owner_id = %owner.id, account_id = %account.id, "Created Stripe Express account");
            account.id
        }
        Err(e) => {
            error!(owner_id = %owner.id, error = %e, "Failed to check existing Stripe account");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to check Stripe account status",
            )
            .into_response();
        }
    };

    match create_account_link(&stripe_config, &account_id, &state.config.base_url).await {
        Ok(url) => Json(DataResponse {
            data: StripeOnboardingResponse { url },
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to create Stripe account link");
            metrics::counter!("stripe.api.errors").increment(1);
            json_error(
                StatusCode::BAD_GATEWAY,
                "Failed to create Stripe onboarding link",
            )
            .into_response()
        }
    }
}

/// GET /owner/stripe/status
pub async fn get_stripe_status(owner: OwnerUser, State(state): State<AppState>) -> impl IntoResponse {
    let repo = StripeConnectedAccountsRepository::new(state.pool);

    match repo.get_by_owner_id(owner.0.id).await {
        Ok(account) => Json(DataResponse {
            data: StripeConnectStatusView::from(account),
        })
        .into_response(),
        Err(e) => {
            error!(owner_id = %owner.0.id, error = %e, "Failed to get Stripe status");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get Stripe status",
            )
            .into_response()
        }
    }
}

/// POST /owner/stripe/dashboard
pub async fn get_dashboard_link(
    owner: OwnerUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(stripe_config) = state.stripe_config.clone() else {
        return stripe_unavailable();
    };

    let repo = StripeConnectedAccountsRepository::new(state.pool.clone());
    let account = match repo.get_by_owner_id(owner.0.id).await {
        Ok(Some(account)) if account.onboarding_complete => account,
        Ok(Some(_)) => {
            return json_error(StatusCode::BAD_REQUEST, "Stripe onboarding is not complete")
                .into_response();
        }
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "No Stripe account connected")
                .into_response();
        }
        Err(e) => {
            error!(owner_id = %owner.0.id, error = %e, "Failed to get Stripe account");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get Stripe account",
            )
            .into_response();
        }
    };

    let account_id: stripe::AccountId = match account.stripe_account_id.parse() {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Invalid Stripe account ID in database");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid Stripe account configuration",
            )
            .into_response();
        }
    };

    match LoginLink::create(&stripe_config.client, &account_id, &state.config.base_url).await {
        Ok(link) => Json(DataResponse {
            data: StripeDashboardLinkResponse { url: link.url },
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to create Stripe dashboard link");
            metrics::counter!("stripe.api.errors").increment(1);
            json_error(StatusCode::BAD_GATEWAY, "Failed to create dashboard link").into_response()
        }
    }
}

/// POST /stripe/webhooks
///
/// Answers 500 when processing fails so Stripe redelivers the event; the
/// stored row keeps the error until a later attempt succeeds.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(stripe_config) = state.stripe_config.clone() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let webhook_secret = match stripe_config.webhook_secret() {
        Ok(secret) => secret.to_string(),
        Err(e) => {
            warn!(error = %e, "Rejecting webhook");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    metrics::counter!("stripe.webhook.received").increment(1);
    let start = std::time::Instant::now();

    let Some(signature) = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok())
    else {
        metrics::counter!("stripe.webhook.signature_invalid").increment(1);
        return StatusCode::BAD_REQUEST.into_response();
    };

    let Ok(payload) = std::str::from_utf8(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let event = match Webhook::construct_event(payload, signature, &webhook_secret) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Invalid webhook signature");
            metrics::counter!("stripe.webhook.signature_invalid").increment(1);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let webhook_repo = StripeWebhookEventsRepository::new(state.pool.clone());
    let event_id = event.id.to_string();
    let event_type = event.type_.to_string();

    match webhook_repo.is_processed(&event_id).await {
        Ok(true) => {
            info!(event_id = %event_id, "Skipping already processed webhook event");
            return StatusCode::OK.into_response();
        }
        Ok(false) => {}
        Err(e) => {
            error!(error = %e, "Failed to check webhook idempotency");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let new_event = NewStripeWebhookEvent {
        stripe_event_id: event_id.clone(),
        event_type: event_type.clone(),
        payload: serde_json::from_str(payload).unwrap_or(serde_json::Value::Null),
    };
    if let Err(e) = webhook_repo.record(new_event).await {
        error!(event_id = %event_id, error = %e, "Failed to record webhook event");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let status = match process_webhook_event(&state, &event_type, &event).await {
        Ok(()) => {
            if let Err(e) = webhook_repo.mark_processed(&event_id).await {
                error!(error = %e, "Failed to mark webhook as processed");
            }
            StatusCode::OK
        }
        Err(e) => {
            error!(event_type = %event_type, error = %e, "Failed to process webhook event");
            if let Err(e2) = webhook_repo.mark_failed(&event_id, &format!("{:#}", e)).await {
                error!(error = %e2, "Failed to mark webhook as failed");
            }
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    metrics::histogram!("stripe.webhook.processing_ms")
        .record(start.elapsed().as_millis() as f64);

    status.into_response()
}

/// What a handled webhook event asks the marketplace to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    SyncAccount {
        stripe_account_id: String,
        flags: AccountFlags,
    },
    CheckoutCompleted {
        rental_id: Uuid,
        session_id: String,
        payment_intent_id: Option<String>,
    },
    CheckoutExpired {
        session_id: String,
    },
    PaymentFailed {
        rental_id: Uuid,
        payment_intent_id: String,
    },
    TransferReversed {
        transfer_id: String,
    },
}

async fn process_webhook_event(
    state: &AppState,
    event_type: &str,
    event: &Event,
) -> anyhow::Result<()> {
    let Some(handled) = HandledEvent::from_type(event_type) else {
        info!(event_type = %event_type, "Unhandled webhook event type");
        return Ok(());
    };

    match webhook_action(handled, &event.data.object) {
        Some(action) => apply_webhook_action(state, action).await,
        None => Ok(()),
    }
}

fn webhook_action(handled: HandledEvent, object: &EventObject) -> Option<WebhookAction> {
    match (handled, object) {
        (HandledEvent::AccountUpdated, EventObject::Account(account)) => {
            Some(WebhookAction::SyncAccount {
                stripe_account_id: account.id.to_string(),
                flags: AccountFlags {
                    charges_enabled: account.charges_enabled.unwrap_or(false),
                    payouts_enabled: account.payouts_enabled.unwrap_or(false),
                    details_submitted: account.details_submitted.unwrap_or(false),
                },
            })
        }
        (HandledEvent::CheckoutCompleted, EventObject::CheckoutSession(session)) => {
            let Some(rental_id) = parse_rental_id(session.client_reference_id.as_deref()) else {
                warn!(session_id = %session.id, "Checkout session without a rental reference");
                return None;
            };
            Some(WebhookAction::CheckoutCompleted {
                rental_id,
                session_id: session.id.to_string(),
                payment_intent_id: session
                    .payment_intent
                    .as_ref()
                    .map(|pi| pi.id().to_string()),
            })
        }
        (HandledEvent::CheckoutExpired, EventObject::CheckoutSession(session)) => {
            Some(WebhookAction::CheckoutExpired {
                session_id: session.id.to_string(),
            })
        }
        (HandledEvent::PaymentFailed, EventObject::PaymentIntent(pi)) => {
            let Some(rental_id) = parse_rental_id(pi.metadata.get("rental_id").map(String::as_str))
            else {
                warn!(payment_intent_id = %pi.id, "Failed payment without a rental reference");
                return None;
            };
            Some(WebhookAction::PaymentFailed {
                rental_id,
                payment_intent_id: pi.id.to_string(),
            })
        }
        (HandledEvent::TransferReversed, EventObject::Transfer(transfer)) => {
            Some(WebhookAction::TransferReversed {
                transfer_id: transfer.id.to_string(),
            })
        }
        (handled, _) => {
            warn!(?handled, "Webhook payload did not match its event type");
            None
        }
    }
}

/// Apply a verified webhook event. An error leaves the event unprocessed so
/// Stripe delivers it again.
pub async fn apply_webhook_action(state: &AppState, action: WebhookAction) -> anyhow::Result<()> {
    match action {
        WebhookAction::SyncAccount {
            stripe_account_id,
            flags,
        } => {
            let repo = StripeConnectedAccountsRepository::new(state.pool.clone());
            match repo.update_flags(&stripe_account_id, flags).await? {
                Some(updated) => {
                    if updated.onboarding_complete {
                        metrics::counter!("stripe.connect.onboarding_completed").increment(1);
                    }
                    info!(
                        account_id = %stripe_account_id,
                        owner_id = %updated.owner_id,
                        charges_enabled = flags.charges_enabled,
                        payouts_enabled = flags.payouts_enabled,
                        details_submitted = flags.details_submitted,
                        "Updated Stripe connected account status"
                    );
                }
                None => warn!(account_id = %stripe_account_id, "account.updated for unknown account"),
            }
        }
        WebhookAction::CheckoutCompleted {
            rental_id,
            session_id,
            payment_intent_id,
        } => {
            state
                .rental_service()
                .settle_checkout(rental_id, &session_id, payment_intent_id)
                .await?;
        }
        WebhookAction::CheckoutExpired { session_id } => {
            let rentals_repo = RentalsRepository::new(state.pool.clone());
            if let Some(rental) = rentals_repo.expire_checkout_session(&session_id).await? {
                info!(rental_id = %rental.id, session_id = %session_id, "Checkout session expired");
            }
        }
        WebhookAction::PaymentFailed {
            rental_id,
            payment_intent_id,
        } => {
            let rentals_repo = RentalsRepository::new(state.pool.clone());
            if let Some(rental) = rentals_repo.mark_payment_failed(rental_id).await? {
                warn!(rental_id = %rental.id, payment_intent_id = %payment_intent_id, "Rental payment failed");
            }
        }
        WebhookAction::TransferReversed { transfer_id } => {
            let withdrawals_repo = WithdrawalsRepository::new(state.pool.clone());
            match withdrawals_repo.mark_reversed(&transfer_id).await? {
                Some(withdrawal) => {
                    metrics::counter!("withdrawals.failed").increment(1);
                    warn!(
                        withdrawal_id = %withdrawal.id,
                        transfer_id = %transfer_id,
                        "Withdrawal transfer reversed"
                    );
                }
                None => warn!(transfer_id = %transfer_id, "Reversal for unknown transfer"),
            }
        }
    }

    Ok(())
}

fn parse_rental_id(reference: Option<&str>) -> Option<Uuid> {
    reference.and_then(|value| Uuid::parse_str(value).ok())
}

async fn create_account_link(
    stripe_config: &StripeConfig,
    account_id: &stripe::AccountId,
    base_url: &str,
) -> anyhow::Result<String> {
    let refresh_url = format!("{}/owner/payouts?stripe=refresh", base_url);
    let return_url = format!("{}/owner/payouts?stripe=return", base_url);

    let mut params = CreateAccountLink::new(account_id.clone(), AccountLinkType::AccountOnboarding);
    params.refresh_url = Some(&refresh_url);
    params.return_url = Some(&return_url);

    let link = AccountLink::create(&stripe_config.client, params).await?;
    Ok(link.url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rental_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_rental_id(Some(&id.to_string())), Some(id));
        assert_eq!(parse_rental_id(Some("not-a-uuid")), None);
        assert_eq!(parse_rental_id(None), None);
    }

    #[test]
    fn test_status_view_without_account() {
        let view = StripeConnectStatusView::from(None);
        assert!(!view.connected);
        assert!(view.stripe_account_id.is_none());
    }
}
