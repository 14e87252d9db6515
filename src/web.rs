use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use include_dir::{Dir, include_dir};
use mime_guess::from_path;
use std::time::{Duration, Instant};
use uuid::Uuid;

use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::actions;
use crate::config::AppConfig;
use crate::metrics::{http_metrics_middleware, metrics_handler, process_metrics_task};
use crate::rental_service::RentalService;
use crate::stripe_client::StripeConfig;
use crate::withdrawal_service::WithdrawalService;

// Embed web assets into the binary
static ASSETS: Dir<'_> = include_dir!("web/build");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// How often the web server cancels bookings that went stale
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    /// None when STRIPE_SECRET_KEY is unset; payment routes answer 503
    pub stripe_config: Option<StripeConfig>,
}

impl AppState {
    pub fn rental_service(&self) -> RentalService {
        RentalService::new(self.pool.clone(), &self.config, self.stripe_config.clone())
    }

    pub fn withdrawal_service(&self) -> WithdrawalService {
        WithdrawalService::new(self.pool.clone(), self.stripe_config.clone())
    }
}

fn static_headers(content_type: &str, immutable: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CACHE_CONTROL,
        if immutable {
            HeaderValue::from_static("public, max-age=31536000, immutable")
        } else {
            HeaderValue::from_static("public, max-age=3600")
        },
    );
    headers
}

async fn handle_static_file(uri: Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');

    if let Some(file) = ASSETS.get_file(path) {
        let content_type = from_path(path).first_or_octet_stream();
        let immutable = path.starts_with("_app/") || path.starts_with("assets/");
        return (
            StatusCode::OK,
            static_headers(content_type.as_ref(), immutable),
            file.contents(),
        )
            .into_response();
    }

    // Client-side routes get the SPA shell
    if !path.contains('.')
        && let Some(index_file) = ASSETS.get_file("index.html")
    {
        return (
            StatusCode::OK,
            static_headers("text/html", false),
            index_file.contents(),
        )
            .into_response();
    }

    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    response
}

// Middleware to capture HTTP errors to Sentry
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let status = response.status();
        error!("HTTP {} error on {} {}", status.as_u16(), method, uri);

        sentry::configure_scope(|scope| {
            scope.set_tag("http.method", method.as_str());
            scope.set_tag("http.url", uri.to_string());
            scope.set_tag("http.status_code", status.as_u16().to_string());
        });

        sentry::capture_message(
            &format!("HTTP {} error on {} {}", status.as_u16(), method, uri),
            sentry::Level::Error,
        );
    }

    response
}

/// The full application router, without binding a listener
pub fn build_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/status", get(actions::get_status))
        .route("/metrics", get(metrics_handler))
        // Authentication
        .route("/auth/register", post(actions::register_user))
        .route("/auth/login", post(actions::login_user))
        .route("/auth/me", get(actions::get_current_user))
        .route("/auth/password", put(actions::change_password))
        // Public car search
        .route("/cars", get(actions::search_cars))
        .route("/cars/{id}", get(actions::get_car_by_id))
        .route("/cars/{id}/status", put(actions::set_car_status))
        // Customer rentals
        .route(
            "/rentals",
            get(actions::get_my_rentals).post(actions::create_rental),
        )
        .route("/rentals/{id}", get(actions::get_rental_by_id))
        .route(
            "/rentals/{id}/transitions",
            get(actions::get_rental_transitions),
        )
        .route("/rentals/{id}/approve", post(actions::approve_rental))
        .route("/rentals/{id}/reject", post(actions::reject_rental))
        .route("/rentals/{id}/start", post(actions::start_rental))
        .route("/rentals/{id}/complete", post(actions::complete_rental))
        .route("/rentals/{id}/cancel", post(actions::cancel_rental))
        .route("/rentals/{id}/checkout", post(actions::create_checkout))
        // Owner dashboard
        .route(
            "/owner/cars",
            get(actions::get_my_cars).post(actions::create_car),
        )
        .route("/owner/cars/{id}", put(actions::update_car))
        .route("/owner/rentals", get(actions::get_owner_rentals))
        .route("/owner/dashboard", get(actions::get_owner_dashboard))
        .route("/owner/balance", get(actions::get_balance))
        .route(
            "/owner/withdrawals",
            get(actions::get_my_withdrawals).post(actions::create_withdrawal),
        )
        .route("/owner/stripe/onboard", post(actions::start_onboarding))
        .route("/owner/stripe/status", get(actions::get_stripe_status))
        .route("/owner/stripe/dashboard", post(actions::get_dashboard_link))
        // Admin back-office
        .route("/admin/dashboard", get(actions::get_admin_dashboard))
        .route("/admin/cars", get(actions::get_all_cars))
        .route("/admin/cars/{id}/status", put(actions::set_car_status))
        .route("/admin/rentals", get(actions::get_all_rentals))
        .route("/admin/withdrawals", get(actions::get_all_withdrawals))
        .route("/users", get(actions::get_all_users))
        .route(
            "/users/{id}",
            get(actions::get_user_by_id)
                .put(actions::update_user_by_id)
                .delete(actions::delete_user_by_id),
        )
        // Stripe
        .route("/stripe/webhooks", post(actions::handle_webhook))
        .with_state(app_state);

    Router::new()
        .nest("/data", api_router)
        .fallback(handle_static_file)
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(CorsLayer::permissive())
}

/// Cancel stale bookings and retry outstanding refunds and transfers once an hour
async fn stale_booking_sweep(service: RentalService, withdrawals: WithdrawalService) {
    let mut interval = tokio::time::interval(STALE_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match service.expire_stale(Utc::now().date_naive()).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "Expired stale bookings"),
            Err(e) => warn!(error = %e, "Stale booking sweep failed"),
        }
        match service.retry_refunds().await {
            Ok(0) => {}
            Ok(refunded) => info!(refunded, "Issued outstanding refunds"),
            Err(e) => warn!(error = %e, "Refund retry failed"),
        }
        match withdrawals.retry_pending(Utc::now()).await {
            Ok(0) => {}
            Ok(paid) => info!(paid, "Paid out pending withdrawals"),
            Err(e) => warn!(error = %e, "Withdrawal retry failed"),
        }
    }
}

pub async fn start_web_server(
    interface: String,
    port: u16,
    pool: PgPool,
    config: AppConfig,
    stripe_config: Option<StripeConfig>,
) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "web-server");
    });
    info!("Starting web server on {}:{}", interface, port);
    if stripe_config.is_none() {
        warn!("STRIPE_SECRET_KEY is not set, payments and withdrawals are disabled");
    }

    actions::init_server_start_time();
    tokio::spawn(process_metrics_task());

    let app_state = AppState {
        pool,
        config,
        stripe_config,
    };
    tokio::spawn(stale_booking_sweep(
        app_state.rental_service(),
        app_state.withdrawal_service(),
    ));

    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app).await?;

    Ok(())
}
