//! OrtoMediq API Library
//!
//! Stock reservations ("apartados"), sales and the inventory movement ledger
//! for a medical-supply retailer.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, SessionAuthenticator};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
    pub auth: Arc<SessionAuthenticator>,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig) -> Self {
        let services = handlers::AppServices::new(db.clone(), &config);
        let auth = Arc::new(SessionAuthenticator::new(db.clone()));
        Self {
            db,
            config,
            services,
            auth,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// `/api/v1` routes. Reservation endpoints accept any signed-in user;
/// conversion, sales, the ledger and adjustments require staff.
pub fn api_v1_routes(auth: Arc<SessionAuthenticator>) -> Router<AppState> {
    let signed_in = Router::new()
        .route(
            "/reservations",
            post(handlers::reservations::create_reservation)
                .get(handlers::reservations::list_reservations),
        )
        .route("/reservations/:id", get(handlers::reservations::get_reservation))
        .route(
            "/reservations/:id/cancel",
            post(handlers::reservations::cancel_reservation),
        )
        .route(
            "/reservations/:id/review-eligibility",
            get(handlers::reservations::review_eligibility),
        )
        .route(
            "/inventory/products/:id",
            get(handlers::inventory::product_availability),
        )
        .route(
            "/inventory/variants/:id",
            get(handlers::inventory::variant_availability),
        )
        .with_auth(auth.clone());

    let staff = Router::new()
        .route(
            "/reservations/:id/convert",
            post(handlers::reservations::convert_reservation),
        )
        .route(
            "/sales",
            post(handlers::sales::create_sale).get(handlers::sales::list_sales),
        )
        .route("/sales/:id", get(handlers::sales::get_sale))
        .route("/inventory/movements", get(handlers::inventory::list_movements))
        .route(
            "/inventory/adjustments",
            post(handlers::inventory::create_adjustment),
        )
        .with_staff(auth);

    Router::new()
        .route("/status", get(api_status))
        .merge(signed_in)
        .merge(staff)
}

/// Full application router: health, `/api/v1`, Swagger UI, request ids and
/// HTTP tracing. CORS is layered on by the binary from configuration.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes(state.auth.clone()))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        // Outermost so the trace span and error bodies see the request id
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "ortomediq-api",
        "environment": state.config.environment,
        "reservation_expiry_hours": state.config.reservation_expiry_hours,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
