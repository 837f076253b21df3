use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    config::PaymentsConfig,
    errors::ServiceError,
    services::payments::{
        first_successful, CashfreeGateway, GatewayCustomer, GatewayOrderRequest, PaymentGateway,
    },
};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn gateway_for(server: &MockServer) -> CashfreeGateway {
    CashfreeGateway::new(&PaymentsConfig {
        cashfree_app_id: Some("app-id".to_string()),
        cashfree_secret_key: Some("secret-key".to_string()),
        cashfree_base_url: Some(format!("{}/", server.uri())),
        ..PaymentsConfig::default()
    })
    .unwrap()
}

fn order_request() -> GatewayOrderRequest {
    GatewayOrderRequest {
        order_id: "0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11".to_string(),
        amount: dec!(708.00),
        currency: "INR".to_string(),
        note: "Storefront Order".to_string(),
        customer: GatewayCustomer {
            id: "c0ffee00-0000-4000-8000-000000000001".to_string(),
            email: "asha@example.com".to_string(),
            phone: "9876543210".to_string(),
            name: "Asha Rao".to_string(),
        },
        return_url: "https://shop.test/orders/0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11".to_string(),
        notify_url: "https://shop.test/api/v1/orders/0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11/webhook"
            .to_string(),
    }
}

#[tokio::test]
async fn create_order_sends_credentials_and_order_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("x-client-id", "app-id"))
        .and(header("x-client-secret", "secret-key"))
        .and(header("x-api-version", "2022-09-01"))
        .and(body_partial_json(json!({
            "order_id": "0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11",
            "order_amount": 708.0,
            "order_currency": "INR",
            "order_note": "Storefront Order",
            "customer_details": {
                "customer_id": "c0ffee00-0000-4000-8000-000000000001",
                "customer_email": "asha@example.com",
                "customer_phone": "9876543210",
                "customer_name": "Asha Rao"
            },
            "order_meta": {
                "return_url": "https://shop.test/orders/0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11",
                "notify_url": "https://shop.test/api/v1/orders/0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11/webhook"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cf_order_id": 2149460581_i64,
            "order_id": "0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11",
            "order_status": "ACTIVE",
            "order_token": "tok_abc",
            "payment_session_id": "session_abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = gateway_for(&server)
        .create_order(&order_request())
        .await
        .unwrap();

    assert_eq!(created.gateway_order_id, "0b7e6c2a-5d0f-4a51-8f44-3c1f2b9d7e11");
    assert_eq!(created.order_token.as_deref(), Some("tok_abc"));
    assert_eq!(created.payment_session_id.as_deref(), Some("session_abc"));
}

#[tokio::test]
async fn upstream_error_message_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "order_amount : invalid value",
            "code": "order_amount_invalid",
            "type": "invalid_request_error"
        })))
        .mount(&server)
        .await;

    let err = gateway_for(&server)
        .create_order(&order_request())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::ExternalServiceError(ref m) if m == "order_amount : invalid value"
    );
}

#[tokio::test]
async fn payments_are_read_from_any_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/order-1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cf_payment_id": 11, "payment_status": "FAILED"},
            {"cf_payment_id": 12, "payment_status": "SUCCESS", "payment_time": "2024-03-01 04:45:00"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/order-2/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"payment_id": "pay_7", "payment_status": "COMPLETED"}]
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);

    let attempts = gateway.list_payments("order-1").await.unwrap();
    assert_eq!(attempts.len(), 2);
    let paid = first_successful(&attempts).unwrap();
    assert_eq!(paid.payment_id.as_deref(), Some("12"));
    assert!(paid.paid_at.is_some());

    let attempts = gateway.list_payments("order-2").await.unwrap();
    assert_eq!(
        first_successful(&attempts).and_then(|p| p.payment_id.as_deref()),
        Some("pay_7")
    );
}

#[tokio::test]
async fn unconfigured_gateway_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = CashfreeGateway::new(&PaymentsConfig {
        cashfree_app_id: Some("app-id".to_string()),
        cashfree_secret_key: Some("  ".to_string()),
        cashfree_base_url: Some(server.uri()),
        ..PaymentsConfig::default()
    })
    .unwrap();

    assert!(!gateway.is_configured());
    assert_matches!(
        gateway.create_order(&order_request()).await,
        Err(ServiceError::ConfigurationError(_))
    );
    assert_matches!(
        gateway.list_payments("order-1").await,
        Err(ServiceError::ConfigurationError(_))
    );
}

#[test]
fn base_url_follows_environment() {
    let sandbox = CashfreeGateway::new(&PaymentsConfig::default()).unwrap();
    assert_eq!(sandbox.base_url(), "https://sandbox.cashfree.com/pg");

    let live = CashfreeGateway::new(&PaymentsConfig {
        cashfree_environment: "production".to_string(),
        ..PaymentsConfig::default()
    })
    .unwrap();
    assert_eq!(live.base_url(), "https://api.cashfree.com/pg");
}
