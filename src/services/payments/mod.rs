//! Payment gateway abstraction.
//!
//! The order workflow only talks to [`PaymentGateway`]; [`cashfree::CashfreeGateway`]
//! is the production implementation.

pub mod cashfree;

use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use cashfree::CashfreeGateway;

/// Gateway statuses that count as a completed payment
pub const SUCCESSFUL_PAYMENT_STATUSES: [&str; 2] = ["SUCCESS", "COMPLETED"];

/// Customer details forwarded to the hosted checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: String,
    pub phone: String,
    pub name: String,
}

/// Request to open a remote payment session for one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrderRequest {
    /// Our order id, reused as the gateway order id
    pub order_id: String,
    /// Amount already rounded to two decimal places
    pub amount: Decimal,
    pub currency: String,
    pub note: String,
    pub customer: GatewayCustomer,
    pub return_url: String,
    pub notify_url: String,
}

/// Identifiers returned when a payment session is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub order_token: Option<String>,
    pub payment_session_id: Option<String>,
}

/// One payment attempt against a gateway order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub payment_id: Option<String>,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
}

impl GatewayPayment {
    pub fn is_successful(&self) -> bool {
        SUCCESSFUL_PAYMENT_STATUSES.contains(&self.status.as_str())
    }
}

/// Parsed server-to-server payment notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub event_type: Option<String>,
    pub gateway_order_id: String,
    pub payment: GatewayPayment,
}

/// Picks the first successful attempt, in gateway order.
pub fn first_successful(payments: &[GatewayPayment]) -> Option<&GatewayPayment> {
    payments.iter().find(|p| p.is_successful())
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name stored on the order (e.g. "cashfree")
    fn provider(&self) -> &'static str;

    /// Whether credentials are present; no network call is made
    fn is_configured(&self) -> bool;

    /// Opens a hosted-checkout session
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError>;

    /// Lists every payment attempt recorded for a gateway order
    async fn list_payments(
        &self,
        gateway_order_id: &str,
    ) -> Result<Vec<GatewayPayment>, ServiceError>;

    /// Checks a webhook signature against the raw request body
    fn verify_webhook_signature(&self, timestamp: &str, payload: &[u8], signature: &str) -> bool;

    /// Parses a webhook body that already passed signature verification
    fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookNotification, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(status: &str, id: &str) -> GatewayPayment {
        GatewayPayment {
            payment_id: Some(id.to_string()),
            status: status.to_string(),
            paid_at: None,
            signature: None,
        }
    }

    #[test]
    fn success_and_completed_count_as_paid() {
        assert!(attempt("SUCCESS", "1").is_successful());
        assert!(attempt("COMPLETED", "1").is_successful());
        assert!(!attempt("PENDING", "1").is_successful());
        assert!(!attempt("FAILED", "1").is_successful());
        assert!(!attempt("success", "1").is_successful());
    }

    #[test]
    fn first_successful_keeps_gateway_order() {
        let attempts = vec![
            attempt("FAILED", "a"),
            attempt("SUCCESS", "b"),
            attempt("COMPLETED", "c"),
        ];
        assert_eq!(
            first_successful(&attempts).and_then(|p| p.payment_id.as_deref()),
            Some("b")
        );
        assert!(first_successful(&attempts[..1]).is_none());
        assert!(first_successful(&[]).is_none());
    }
}
