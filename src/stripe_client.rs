use anyhow::{Context, Result};
use stripe::{Client, RequestStrategy};

/// Stripe API access for checkout, refunds and owner transfers
#[derive(Clone)]
pub struct StripeConfig {
    pub client: Client,
    /// Absent when webhooks are not configured; the webhook endpoint then answers 503
    pub webhook_secret: Option<String>,
}

impl StripeConfig {
    /// Returns None when STRIPE_SECRET_KEY is not set, so the marketplace can run
    /// without payments in development.
    pub fn from_env() -> Result<Option<Self>> {
        let secret_key = match std::env::var("STRIPE_SECRET_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };
        if !secret_key.starts_with("sk_") && !secret_key.starts_with("rk_") {
            anyhow::bail!("STRIPE_SECRET_KEY does not look like a Stripe secret key");
        }

        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty());

        Ok(Some(Self {
            client: Client::new(secret_key),
            webhook_secret,
        }))
    }

    /// Client that retries safely under the given idempotency key
    pub fn idempotent_client(&self, key: impl Into<String>) -> Client {
        self.client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(key.into()))
    }

    pub fn webhook_secret(&self) -> Result<&str> {
        self.webhook_secret
            .as_deref()
            .context("STRIPE_WEBHOOK_SECRET is not configured")
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}
