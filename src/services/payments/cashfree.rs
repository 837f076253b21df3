use super::{GatewayOrder, GatewayOrderRequest, GatewayPayment, PaymentGateway, WebhookNotification};
use crate::{config::PaymentsConfig, errors::ServiceError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

pub const PROVIDER: &str = "cashfree";

/// Cashfree Payment Gateway client
#[derive(Clone)]
pub struct CashfreeGateway {
    client: reqwest::Client,
    base_url: String,
    app_id: Option<String>,
    secret_key: Option<String>,
    api_version: String,
    webhook_tolerance_secs: u64,
}

impl std::fmt::Debug for CashfreeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CashfreeGateway")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    order_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    order_amount: Decimal,
    order_currency: &'a str,
    order_note: &'a str,
    customer_details: CustomerDetails<'a>,
    order_meta: OrderMeta<'a>,
}

#[derive(Serialize)]
struct CustomerDetails<'a> {
    customer_id: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
    customer_name: &'a str,
}

#[derive(Serialize)]
struct OrderMeta<'a> {
    return_url: &'a str,
    notify_url: &'a str,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    order_id: String,
    #[serde(default)]
    order_token: Option<String>,
    #[serde(default)]
    payment_session_id: Option<String>,
}

#[derive(Deserialize)]
struct PaymentAttempt {
    #[serde(default)]
    cf_payment_id: Option<Value>,
    #[serde(default)]
    payment_id: Option<Value>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_time: Option<String>,
    #[serde(default)]
    payment_signature: Option<String>,
}

impl From<PaymentAttempt> for GatewayPayment {
    fn from(attempt: PaymentAttempt) -> Self {
        GatewayPayment {
            payment_id: attempt
                .cf_payment_id
                .as_ref()
                .and_then(id_to_string)
                .or_else(|| attempt.payment_id.as_ref().and_then(id_to_string)),
            status: attempt.payment_status.unwrap_or_default(),
            paid_at: attempt.payment_time.as_deref().and_then(parse_payment_time),
            signature: attempt.payment_signature,
        }
    }
}

#[derive(Deserialize)]
struct WebhookBody {
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    data: WebhookData,
}

#[derive(Deserialize)]
struct WebhookData {
    order: WebhookOrder,
    payment: PaymentAttempt,
}

#[derive(Deserialize)]
struct WebhookOrder {
    order_id: String,
}

/// Payment ids arrive as numbers or strings
fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339 and the gateway's "YYYY-MM-DD HH:MM:SS" form (taken as UTC)
fn parse_payment_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Payment lists come bare or wrapped in `payments` / `data`
fn extract_attempts(body: Value) -> Vec<PaymentAttempt> {
    let list = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("payments").or_else(|| map.remove("data")) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    list.into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// Pulls a human-readable message out of an upstream error body
fn upstream_message(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("Cashfree request failed with status {}", status.as_u16())
            } else {
                body.to_string()
            }
        })
}

impl CashfreeGateway {
    /// Builds a client from configuration. Missing credentials are allowed here;
    /// they surface as `ConfigurationError` when an operation needs them.
    pub fn new(config: &PaymentsConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.cashfree_base_url(),
            app_id: config.cashfree_app_id.clone().filter(|v| !v.trim().is_empty()),
            secret_key: config
                .cashfree_secret_key
                .clone()
                .filter(|v| !v.trim().is_empty()),
            api_version: config.cashfree_api_version.clone(),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        match (self.app_id.as_deref(), self.secret_key.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(ServiceError::ConfigurationError(
                "Cashfree credentials are not configured".to_string(),
            )),
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, ServiceError> {
        let (app_id, secret) = self.credentials()?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-client-id", app_id)
            .header("x-client-secret", secret)
            .header("x-api-version", &self.api_version)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, ServiceError> {
        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "Cashfree request failed");
            ServiceError::ExternalServiceError(format!("Cashfree request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Cashfree API error: {}", error_text);
            return Err(ServiceError::ExternalServiceError(upstream_message(
                &error_text,
                status,
            )));
        }

        response.json::<Value>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Invalid Cashfree response: {}", e))
        })
    }

    fn timestamp_is_fresh(&self, timestamp: &str) -> bool {
        let Ok(raw) = timestamp.trim().parse::<i64>() else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        // Millisecond timestamps are 13 digits
        let secs = if raw > 100_000_000_000 { raw / 1000 } else { raw };
        Utc::now()
            .timestamp()
            .checked_sub(secs)
            .is_some_and(|skew| skew.unsigned_abs() <= self.webhook_tolerance_secs)
    }
}

#[async_trait]
impl PaymentGateway for CashfreeGateway {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError> {
        let body = CreateOrderBody {
            order_id: &request.order_id,
            order_amount: request.amount,
            order_currency: &request.currency,
            order_note: &request.note,
            customer_details: CustomerDetails {
                customer_id: &request.customer.id,
                customer_email: &request.customer.email,
                customer_phone: &request.customer.phone,
                customer_name: &request.customer.name,
            },
            order_meta: OrderMeta {
                return_url: &request.return_url,
                notify_url: &request.notify_url,
            },
        };

        let value = self
            .send(self.request(reqwest::Method::POST, "/orders")?.json(&body))
            .await?;
        let created: CreateOrderResponse = serde_json::from_value(value).map_err(|e| {
            ServiceError::ExternalServiceError(format!("Invalid Cashfree order response: {}", e))
        })?;

        info!(gateway_order_id = %created.order_id, "Cashfree order created");
        Ok(GatewayOrder {
            gateway_order_id: created.order_id,
            order_token: created.order_token,
            payment_session_id: created.payment_session_id,
        })
    }

    #[instrument(skip(self))]
    async fn list_payments(
        &self,
        gateway_order_id: &str,
    ) -> Result<Vec<GatewayPayment>, ServiceError> {
        let path = format!("/orders/{}/payments", gateway_order_id);
        let value = self
            .send(self.request(reqwest::Method::GET, &path)?)
            .await?;

        let payments: Vec<GatewayPayment> = extract_attempts(value)
            .into_iter()
            .map(GatewayPayment::from)
            .collect();
        debug!(count = payments.len(), "Fetched Cashfree payment attempts");
        Ok(payments)
    }

    fn verify_webhook_signature(&self, timestamp: &str, payload: &[u8], signature: &str) -> bool {
        let Some(secret) = self.secret_key.as_deref() else {
            return false;
        };
        if !self.timestamp_is_fresh(timestamp) {
            return false;
        }
        let Ok(expected) = BASE64.decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.as_bytes());
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookNotification, ServiceError> {
        let body: WebhookBody = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("invalid webhook payload: {}", e)))?;
        Ok(WebhookNotification {
            event_type: body.event_type,
            gateway_order_id: body.data.order.order_id,
            payment: body.data.payment.into(),
        })
    }
}

/// Computes the signature Cashfree attaches to a webhook
pub fn sign_webhook(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(payload);
    BASE64.encode(mac.finalize().into_bytes())
}
