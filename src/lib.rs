//! MiRide - peer-to-peer car rental marketplace
//!
//! Customers book cars listed by owners, owners approve and hand over the
//! cars, and the platform takes a commission before owners withdraw their
//! earnings through Stripe Connect.

pub mod actions;
pub mod auth;
pub mod cars;
pub mod cars_repo;
pub mod config;
pub mod dashboard;
pub mod dashboard_repo;
pub mod metrics;
pub mod rental_service;
pub mod rentals;
pub mod rentals_repo;
pub mod schema;
pub mod stripe_client;
pub mod stripe_connected_accounts;
pub mod stripe_connected_accounts_repo;
pub mod stripe_webhooks;
pub mod stripe_webhooks_repo;
pub mod users;
pub mod users_repo;
pub mod web;
pub mod withdrawal_service;
pub mod withdrawals;
pub mod withdrawals_repo;


pub use config::AppConfig;
pub use rental_service::RentalService;
pub use web::PgPool;
pub use withdrawal_service::WithdrawalService;
