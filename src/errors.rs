use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON body of every failed request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Validation error: Cart is empty",
    "request_id": "4c1f0d7e-2a8b-4a51-9f0e-6a3d1c2b7e11",
    "timestamp": "2024-03-01T10:15:00+00:00"
}))]
pub struct ErrorResponse {
    /// Canonical reason phrase of the status code
    #[schema(example = "Bad Request")]
    pub error: String,
    #[schema(example = "Validation error: Cart is empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Echo of `x-request-id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
}

impl ErrorResponse {
    fn render(status: StatusCode, message: String) -> Response {
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_owned(),
            message,
            details: None,
            request_id: crate::tracing::current_request_id().map(|rid| rid.0),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

/// Failures of the storefront services.
///
/// HTTP handlers turn these into responses through [`ServiceError::status_code`]
/// and [`ServiceError::response_message`].
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A request needs more units than the product has
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not the owner, or missing a role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Gateway credentials absent
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Retryable: the gateway has no successful attempt yet.
    #[error("{0}")]
    PaymentPending(String),

    /// The gateway failed or rejected the call; carries its message
    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::ValidationError(errors.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        use ServiceError::*;
        match self {
            ValidationError(_) | InsufficientStock(_) | PaymentPending(_) => {
                StatusCode::BAD_REQUEST
            }
            Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Forbidden(_) => StatusCode::FORBIDDEN,
            NotFound(_) => StatusCode::NOT_FOUND,
            ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ConfigurationError(_)
            | DatabaseError(_)
            | SerializationError(_)
            | InternalError(_)
            | Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The caller may repeat the same request later and expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PaymentPending(_))
    }

    /// Message shown to clients. Server-side failures are reduced to a
    /// generic phrase; the detail only goes to the log.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_owned(),
            Self::ConfigurationError(_) => "Payment gateway is not configured".to_owned(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_owned()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }
        ErrorResponse::render(status, self.response_message())
    }
}

/// Error returned by HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    /// Request body failed its `validator` rules
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(inner) => inner.into_response(),
            ApiError::ValidationError(msg) => ErrorResponse::render(StatusCode::BAD_REQUEST, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::{scope_request_id, RequestId};
    use axum::body::to_bytes;
    use rstest::rstest;

    async fn body_of(response: Response) -> ErrorResponse {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[rstest]
    #[case(ServiceError::ValidationError("Cart is empty".into()), 400)]
    #[case(ServiceError::InsufficientStock("Kettle".into()), 400)]
    #[case(ServiceError::PaymentPending("later".into()), 400)]
    #[case(ServiceError::Unauthorized("bad signature".into()), 401)]
    #[case(ServiceError::Forbidden("not yours".into()), 403)]
    #[case(ServiceError::NotFound("order".into()), 404)]
    #[case(ServiceError::ConfigurationError("no keys".into()), 500)]
    #[case(ServiceError::InternalError("boom".into()), 500)]
    #[case(ServiceError::ExternalServiceError("upstream".into()), 502)]
    fn maps_to_http_status(#[case] err: ServiceError, #[case] expected: u16) {
        assert_eq!(err.status_code().as_u16(), expected);
    }

    #[test]
    fn server_side_detail_stays_out_of_the_message() {
        assert_eq!(
            ServiceError::InternalError("pool exhausted".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::ConfigurationError("CASHFREE_SECRET_KEY missing".into())
                .response_message(),
            "Payment gateway is not configured"
        );
        assert_eq!(
            ServiceError::ValidationError("Cart is empty".into()).response_message(),
            "Validation error: Cart is empty"
        );
        assert_eq!(
            ServiceError::ExternalServiceError("order_amount invalid".into()).response_message(),
            "External service error: order_amount invalid"
        );
    }

    #[test]
    fn retry_is_only_suggested_for_pending_payments() {
        assert!(ServiceError::PaymentPending("x".into()).is_retryable());
        assert!(!ServiceError::InsufficientStock("x".into()).is_retryable());
        assert!(!ServiceError::ExternalServiceError("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn body_carries_scoped_request_id() {
        let response = scope_request_id(RequestId::new("rid-7"), async {
            ServiceError::NotFound("order 1".into()).into_response()
        })
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_of(response).await;
        assert_eq!(body.error, "Not Found");
        assert_eq!(body.message, "Not found: order 1");
        assert_eq!(body.request_id.as_deref(), Some("rid-7"));
    }

    #[tokio::test]
    async fn pending_message_reaches_client_verbatim() {
        let body = body_of(
            ServiceError::PaymentPending("Payment not successful yet. Please try again.".into())
                .into_response(),
        )
        .await;
        assert_eq!(body.message, "Payment not successful yet. Please try again.");
    }

    #[tokio::test]
    async fn api_errors_render_like_service_errors() {
        let response = ApiError::from(ServiceError::Forbidden("nope".into())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = ApiError::ValidationError("quantity: range".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await.message, "quantity: range");
    }
}
