pub mod create_admin;
pub mod expire_stale_bookings;
pub mod inspect_rental;
pub mod migrate;
pub mod seed_test_data;
pub mod web;

pub use create_admin::handle_create_admin;
pub use expire_stale_bookings::handle_expire_stale_bookings;
pub use inspect_rental::handle_inspect_rental;
pub use migrate::handle_migrate;
pub use seed_test_data::handle_seed_test_data;
pub use web::handle_web;
