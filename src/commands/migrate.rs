use anyhow::{Context, Result};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

use miride::PgPool;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

/// Apply every pending migration embedded in the binary
pub fn handle_migrate(pool: &PgPool) -> Result<()> {
    let mut conn = pool.get().context("Failed to get database connection")?;

    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    if applied.is_empty() {
        info!("Database schema is up to date");
    } else {
        for version in &applied {
            info!(%version, "Applied migration");
        }
        info!(count = applied.len(), "Database migrations completed");
    }

    Ok(())
}
