use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::{
    errors::{ApiError, ServiceError},
    handlers::common::success_response,
    services::commerce::WebhookAck,
    ApiResponse, AppState,
};

pub const WEBHOOK_TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// POST /api/v1/orders/{id}/webhook
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/webhook",
    summary = "Cashfree payment notification",
    description = "Server-to-server callback. Authenticated by HMAC signature over timestamp and raw body.",
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("x-webhook-timestamp" = String, Header, description = "Gateway timestamp"),
        ("x-webhook-signature" = String, Header, description = "base64 HMAC-SHA256 signature")
    ),
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = ApiResponse<WebhookAck>),
        (status = 400, description = "Invalid payload or order mismatch", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn cashfree_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (Some(timestamp), Some(signature)) = (
        header_str(&headers, WEBHOOK_TIMESTAMP_HEADER),
        header_str(&headers, WEBHOOK_SIGNATURE_HEADER),
    ) else {
        warn!(order_id = %id, "webhook without signature headers");
        return Err(ServiceError::Unauthorized("Missing webhook signature".to_string()).into());
    };

    let ack = state
        .services
        .orders
        .handle_webhook(id, timestamp, signature, &body)
        .await?;

    Ok(success_response(ack))
}
