use anyhow::{Context, Result};

use crate::rentals::{Commission, RefundPolicy};

/// Marketplace settings read from the environment at start-up.
#[derive(Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    /// Public URL of the SPA, used for Stripe redirect targets
    pub base_url: String,
    pub currency: String,
    pub commission: Commission,
    pub refund_policy: RefundPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        Self::from_lookup(jwt_secret, |key| std::env::var(key).ok())
    }

    /// Settings for CLI commands that never issue tokens
    pub fn for_maintenance() -> Result<Self> {
        Self::from_lookup(String::new(), |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        jwt_secret: String,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let base_url = lookup("BASE_URL").unwrap_or_else(|| "http://localhost:5173".to_string());
        let currency = lookup("MIRIDE_CURRENCY")
            .unwrap_or_else(|| "usd".to_string())
            .to_lowercase();
        if currency.len() != 3 {
            anyhow::bail!("MIRIDE_CURRENCY must be a three-letter ISO code, got {currency:?}");
        }

        let commission_bps: u32 = lookup("MIRIDE_COMMISSION_BPS")
            .unwrap_or_else(|| "1000".to_string())
            .parse()
            .context("MIRIDE_COMMISSION_BPS must be a valid number")?;
        let full_refund_hours: i64 = lookup("MIRIDE_FULL_REFUND_HOURS")
            .unwrap_or_else(|| "48".to_string())
            .parse()
            .context("MIRIDE_FULL_REFUND_HOURS must be a valid number")?;
        let late_cancel_refund_bps: u32 = lookup("MIRIDE_LATE_CANCEL_REFUND_BPS")
            .unwrap_or_else(|| "5000".to_string())
            .parse()
            .context("MIRIDE_LATE_CANCEL_REFUND_BPS must be a valid number")?;

        Ok(Self {
            jwt_secret,
            base_url: base_url.trim_end_matches('/').to_string(),
            currency,
            commission: Commission::new(commission_bps)?,
            refund_policy: RefundPolicy::new(full_refund_hours, late_cancel_refund_bps)?,
        })
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("currency", &self.currency)
            .field("commission", &self.commission)
            .field("refund_policy", &self.refund_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup("secret".to_string(), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.base_url, "http://localhost:5173");
        assert_eq!(config.currency, "usd");
        assert_eq!(config.commission.bps(), 1000);
        assert_eq!(config.refund_policy.full_refund_hours, 48);
        assert_eq!(config.refund_policy.late_cancel_refund_bps, 5000);
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = config_with(&[
            ("BASE_URL", "https://miride.example/"),
            ("MIRIDE_CURRENCY", "EUR"),
            ("MIRIDE_COMMISSION_BPS", "1500"),
        ])
        .unwrap();
        assert_eq!(config.base_url, "https://miride.example");
        assert_eq!(config.currency, "eur");
        assert_eq!(config.commission.bps(), 1500);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(config_with(&[("MIRIDE_COMMISSION_BPS", "ten")]).is_err());
        assert!(config_with(&[("MIRIDE_COMMISSION_BPS", "10001")]).is_err());
        assert!(config_with(&[("MIRIDE_CURRENCY", "dollars")]).is_err());
        assert!(config_with(&[("MIRIDE_LATE_CANCEL_REFUND_BPS", "20000")]).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = config_with(&[]).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("\"secret\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
