//! Storefront API Library
//!
//! Cart, checkout and Cashfree payment flow for the storefront backend.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::payments::PaymentGateway;

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires services around a connection pool and a payment gateway
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(config.as_ref().into()));
        let services = handlers::AppServices::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
            gateway,
        );
        Self {
            db,
            config,
            event_sender,
            auth,
            services,
        }
    }
}

/// Envelope for every successful JSON response
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
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
            request_id: crate::tracing::current_request_id().map(|rid| rid.0),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(per_page)
        };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Routes under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    let cart = Router::new()
        .route(
            "/cart",
            get(handlers::carts::get_cart).delete(handlers::carts::clear_cart),
        )
        .route("/cart/items", post(handlers::carts::add_cart_item))
        .route(
            "/cart/items/:item_id",
            put(handlers::carts::update_cart_item).delete(handlers::carts::remove_cart_item),
        )
        .with_auth();

    let orders_user = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/myorders", get(handlers::orders::my_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/verify-payment",
            post(handlers::orders::verify_payment),
        )
        .with_auth();

    let orders_admin = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id/deliver", put(handlers::orders::mark_delivered))
        .with_role(ADMIN_ROLE);

    // Authenticated by signature, not by bearer token
    let payment_webhook = Router::new().route(
        "/orders/:id/webhook",
        post(handlers::payment_webhooks::cashfree_webhook),
    );

    Router::new()
        .merge(cart)
        .merge(orders_user)
        .merge(orders_admin)
        .merge(payment_webhook)
}

/// Public probes, the OpenAPI document and `/api/v1`, wrapped in the shared layers.
///
/// Outermost first: request id, HTTP trace span, auth service injection.
pub fn app_router(state: AppState) -> Router {
    let inject_auth = middleware::from_fn_with_state(
        state.auth.clone(),
        |State(auth): State<Arc<AuthService>>,
         mut req: axum::extract::Request,
         next: middleware::Next| async move {
            req.extensions_mut().insert(auth);
            next.run(req).await
        },
    );

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .layer(inject_auth)
        .layer(crate::tracing::configure_http_tracing())
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
        "environment": state.config.environment,
        "payment_gateway_configured": state.config.payments.has_credentials(),
    })))
}

/// Always 200; the body reports whether the database answers
async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let database = if db::check_connection(&state.db).await.is_ok() {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(ApiResponse::success(json!({
        "status": database,
        "checks": { "database": database },
    })))
}
