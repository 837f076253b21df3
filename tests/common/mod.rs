#![allow(dead_code)]

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    auth::{AuthUser, ADMIN_ROLE},
    config::{AppConfig, PaymentsConfig},
    db::{self, DbConfig},
    entities::{product, Product, ProductModel},
    errors::ServiceError,
    events::{self, EventSender},
    services::payments::{
        cashfree::{sign_webhook, CashfreeGateway},
        GatewayOrder, GatewayOrderRequest, GatewayPayment, PaymentGateway, WebhookNotification,
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "Zq8v1Lx3Tn6Rb0Wk4Yp7Hd2Jm5Fs9Ca1Ge3Ui6Oy8Xw0Vt2Qr4Np7Mk9Lj1Hg3Fd5Sa";
pub const WEBHOOK_SECRET: &str = "cf_test_webhook_secret";

type Interleaved = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct GatewayScript {
    payments: Vec<GatewayPayment>,
    create_error: Option<String>,
    during_create: Option<Interleaved>,
    requests: Vec<GatewayOrderRequest>,
    list_calls: usize,
}

/// Scriptable stand-in for the Cashfree gateway.
///
/// Webhook signatures are checked with [`WEBHOOK_SECRET`] and bodies are
/// parsed by the real Cashfree parser.
pub struct FakeGateway {
    configured: bool,
    script: Mutex<GatewayScript>,
    parser: CashfreeGateway,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    pub fn unconfigured() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    fn build(configured: bool) -> Self {
        Self {
            configured,
            script: Mutex::new(GatewayScript::default()),
            parser: CashfreeGateway::new(&PaymentsConfig::default())
                .expect("gateway parser for tests"),
        }
    }

    /// Attempts returned by every later `list_payments` call
    pub fn set_payments(&self, payments: Vec<GatewayPayment>) {
        self.script.lock().unwrap().payments = payments;
    }

    /// Makes `create_order` fail with this upstream message
    pub fn reject_orders(&self, message: &str) {
        self.script.lock().unwrap().create_error = Some(message.to_string());
    }

    /// Runs `work` inside the next `create_order`, before it answers
    pub fn during_next_create(&self, work: impl Future<Output = ()> + Send + 'static) {
        self.script.lock().unwrap().during_create = Some(Box::pin(work));
    }

    pub fn last_request(&self) -> Option<GatewayOrderRequest> {
        self.script.lock().unwrap().requests.last().cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }

    pub fn list_calls(&self) -> usize {
        self.script.lock().unwrap().list_calls
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> &'static str {
        "cashfree"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError> {
        let interleaved = self.script.lock().unwrap().during_create.take();
        if let Some(work) = interleaved {
            work.await;
        }

        let mut script = self.script.lock().unwrap();
        script.requests.push(request.clone());
        if let Some(message) = script.create_error.clone() {
            return Err(ServiceError::ExternalServiceError(message));
        }
        Ok(GatewayOrder {
            gateway_order_id: request.order_id.clone(),
            order_token: Some(format!("token_{}", request.order_id)),
            payment_session_id: Some(format!("session_{}", request.order_id)),
        })
    }

    async fn list_payments(
        &self,
        _gateway_order_id: &str,
    ) -> Result<Vec<GatewayPayment>, ServiceError> {
        let mut script = self.script.lock().unwrap();
        script.list_calls += 1;
        Ok(script.payments.clone())
    }

    fn verify_webhook_signature(&self, timestamp: &str, payload: &[u8], signature: &str) -> bool {
        sign_webhook(WEBHOOK_SECRET, timestamp, payload) == signature
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookNotification, ServiceError> {
        self.parser.parse_webhook(payload)
    }
}

pub fn payment(status: &str, payment_id: &str) -> GatewayPayment {
    GatewayPayment {
        payment_id: Some(payment_id.to_string()),
        status: status.to_string(),
        paid_at: None,
        signature: Some(format!("sig_{}", payment_id)),
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::new(
        "sqlite::memory:".to_string(),
        TEST_JWT_SECRET.to_string(),
        3600,
        "127.0.0.1".to_string(),
        8080,
        "development".to_string(),
    )
}

pub fn shopper(user_id: Uuid) -> AuthUser {
    AuthUser {
        user_id,
        name: Some("Asha Rao".to_string()),
        email: Some("asha@example.com".to_string()),
        roles: vec![],
        token_id: Uuid::new_v4().to_string(),
    }
}

/// Application state over a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(FakeGateway::new()).await
    }

    pub async fn with_gateway(gateway: Arc<FakeGateway>) -> Self {
        let cfg = test_config();

        // One connection: every handle must see the same in-memory database
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel();
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(
            Arc::new(pool),
            Arc::new(cfg),
            Arc::new(event_sender),
            gateway.clone(),
        );
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> ProductModel {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            images: Set(json!([format!("/images/{}.jpg", name.to_lowercase())])),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        Product::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
            .stock
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .auth
            .generate_token(
                user_id,
                Some("Asha Rao".to_string()),
                Some("asha@example.com".to_string()),
                vec![],
            )
            .expect("sign shopper token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .generate_token(
                Uuid::new_v4(),
                Some("Ops".to_string()),
                None,
                vec![ADMIN_ROLE.to_string()],
            )
            .expect("sign admin token")
    }

    /// Sends a JSON request with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "shop.test");

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("build request")).await
    }

    /// Posts a raw body the way the gateway delivers webhooks.
    pub async fn post_webhook(
        &self,
        order_id: Uuid,
        payload: &[u8],
        timestamp: &str,
        signature: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/orders/{}/webhook", order_id))
            .header("content-type", "application/json")
            .header("x-webhook-timestamp", timestamp);
        if let Some(sig) = signature {
            builder = builder.header("x-webhook-signature", sig);
        }
        self.send(builder.body(Body::from(payload.to_vec())).expect("build request"))
            .await
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

pub fn webhook_body(gateway_order_id: &str, status: &str) -> Vec<u8> {
    json!({
        "type": "PAYMENT_SUCCESS_WEBHOOK",
        "event_time": "2024-03-01T10:15:00+05:30",
        "data": {
            "order": {"order_id": gateway_order_id, "order_amount": 708.0},
            "payment": {
                "cf_payment_id": 5114910,
                "payment_status": status,
                "payment_time": "2024-03-01T10:15:00+05:30"
            }
        }
    })
    .to_string()
    .into_bytes()
}
