use anyhow::Result;

use miride::PgPool;
use miride::config::AppConfig;
use miride::stripe_client::StripeConfig;

use super::handle_migrate;

pub async fn handle_web(interface: String, port: u16, pool: PgPool) -> Result<()> {
    let config = AppConfig::from_env()?;
    let stripe_config = StripeConfig::from_env()?;

    handle_migrate(&pool)?;
    miride::metrics::init_metrics()?;

    miride::web::start_web_server(interface, port, pool, config, stripe_config).await
}
