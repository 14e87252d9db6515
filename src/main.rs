use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use miride::PgPool;

mod commands;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "miride")]
#[command(about = "Peer-to-peer car rental marketplace")]
#[command(version = env!("VERGEN_GIT_DESCRIBE"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run migrations and start the web server
    Web {
        #[arg(long, default_value = "localhost")]
        interface: String,
        #[arg(long, default_value_t = 61225)]
        port: u16,
    },
    /// Run pending database migrations
    Migrate,
    /// Seed users, cars and rentals for local development and E2E tests
    SeedTestData,
    /// Print a rental with its parties, next transitions and refund quote
    InspectRental { id: Uuid },
    /// Cancel bookings that were never approved or paid by their start date
    ExpireStaleBookings,
    /// Create an admin account
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Admin")]
        first_name: String,
        #[arg(long, default_value = "User")]
        last_name: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
}

fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: Some(env!("VERGEN_GIT_DESCRIBE").into()),
            environment: std::env::var("SENTRY_ENVIRONMENT").ok().map(Into::into),
            ..Default::default()
        },
    )))
}

fn build_pool() -> Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(20)
        .build(manager)
        .context("Failed to create database connection pool")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _sentry = init_sentry();
    init_tracing();

    let cli = Cli::parse();
    let pool = build_pool()?;
    info!(version = env!("VERGEN_GIT_DESCRIBE"), "miride starting");

    match cli.command {
        Commands::Web { interface, port } => {
            commands::handle_web(interface, port, pool).await
        }
        Commands::Migrate => commands::handle_migrate(&pool),
        Commands::SeedTestData => commands::handle_seed_test_data(&pool).await,
        Commands::InspectRental { id } => commands::handle_inspect_rental(pool, id).await,
        Commands::ExpireStaleBookings => commands::handle_expire_stale_bookings(pool).await,
        Commands::CreateAdmin {
            email,
            password,
            first_name,
            last_name,
        } => commands::handle_create_admin(pool, email, password, first_name, last_name).await,
    }
}
