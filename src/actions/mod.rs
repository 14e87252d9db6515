pub mod auth;
pub mod cars;
pub mod dashboard;
pub mod rentals;
pub mod status;
pub mod stripe_connect;
pub mod users;
pub mod views;
pub mod withdrawals;

pub use auth::*;
pub use cars::*;
pub use dashboard::*;
pub use rentals::*;
pub use status::*;
pub use stripe_connect::*;
pub use users::*;
pub use withdrawals::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

/// Standard single-object response body: `{"data": ...}`
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Standard list response body: `{"data": [...]}`
#[derive(Debug, Serialize)]
pub struct DataListResponse<T: Serialize> {
    pub data: Vec<T>,
}

/// Error body: `{"errors": "<message>"}`
pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse + use<> {
    (
        status,
        Json(serde_json::json!({
            "errors": message,
        })),
    )
}

/// Clamp a client-supplied page size
pub fn page_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(100).clamp(1, 500)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_json_error_body() {
        let response = json_error(StatusCode::CONFLICT, "Car is already booked").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["errors"], "Car is already booked");
    }

    #[test]
    fn test_page_limit_bounds() {
        assert_eq!(page_limit(None), 100);
        assert_eq!(page_limit(Some(0)), 1);
        assert_eq!(page_limit(Some(10_000)), 500);
    }
}
