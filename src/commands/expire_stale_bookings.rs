use anyhow::Result;
use chrono::Utc;
use tracing::info;

use miride::config::AppConfig;
use miride::stripe_client::StripeConfig;
use miride::{PgPool, RentalService, WithdrawalService};

/// Run the stale-booking sweep once, the same pass the web server runs hourly.
/// Refunds and withdrawal transfers left outstanding by a failed Stripe call
/// are retried too.
pub async fn handle_expire_stale_bookings(pool: PgPool) -> Result<()> {
    let config = AppConfig::for_maintenance()?;
    let stripe = StripeConfig::from_env()?;
    let service = RentalService::new(pool.clone(), &config, stripe.clone());
    let withdrawals = WithdrawalService::new(pool, stripe);

    let today = Utc::now().date_naive();
    let expired = service.expire_stale(today).await?;

    let refunded = service.retry_refunds().await?;
    let paid = withdrawals.retry_pending(Utc::now()).await?;

    info!(expired, refunded, paid, %today, "Stale booking sweep finished");
    println!("Expired {} stale booking(s)", expired);
    if refunded > 0 {
        println!("Issued {} outstanding refund(s)", refunded);
    }
    if paid > 0 {
        println!("Paid out {} pending withdrawal(s)", paid);
    }
    Ok(())
}
