pub mod auth;
pub mod rental;
pub mod user;

pub use auth::*;
pub use rental::*;
pub use user::*;
