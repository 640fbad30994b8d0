pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod openapi;
pub mod services;
pub mod stripe;

use axum::{
    extract::State,
    http::HeaderValue,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    CheckoutLinkService, NotificationService, OrderService, PaymentSessionService, PricingService,
};

/// Service bundle shared through the router state.
pub struct AppServices {
    pub pricing: PricingService,
    pub checkout_links: CheckoutLinkService,
    pub payment_sessions: PaymentSessionService,
    pub orders: OrderService,
    pub notifications: Arc<NotificationService>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: Arc<AppServices>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        stripe: stripe::StripeClient,
    ) -> Self {
        let pricing = PricingService::new(db.clone());
        let services = AppServices {
            pricing: pricing.clone(),
            checkout_links: CheckoutLinkService::new(
                db.clone(),
                config.clone(),
                event_sender.clone(),
            ),
            payment_sessions: PaymentSessionService::new(
                db.clone(),
                config.clone(),
                stripe,
                pricing,
            ),
            orders: OrderService::new(db.clone(), event_sender.clone()),
            notifications: Arc::new(NotificationService::new(
                db.clone(),
                config.email.clone(),
                config.line.clone(),
            )),
        };

        Self {
            db,
            config,
            event_sender,
            services: Arc::new(services),
        }
    }
}

// Common query parameters for list endpoints
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
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
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .route(
            "/recommendations/:id/checkout-link",
            post(handlers::checkout_links::issue_checkout_link),
        )
        .route("/checkout/:token", get(handlers::checkout::checkout_summary))
        .route(
            "/checkout/:token/session",
            post(handlers::checkout::create_hosted_session),
        )
        .route(
            "/checkout/:token/promptpay",
            post(handlers::checkout::create_promptpay_session),
        )
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
}

/// Assembles the full application router with its middleware stack.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_allowed_origins.as_deref());
    Router::new()
        .route("/", get(root))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}

/// Permissive unless an explicit origin list is configured, in which
/// case only those origins are allowed.
fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    match allowed_origins {
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "apothecary-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn api_status() -> ApiResult<Value> {
    Ok(Json(ApiResponse::success(json!({
        "status": "ok",
        "service": "apothecary-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}
