use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Cart, checkout and payment endpoints for the storefront. Payments go through
Cashfree's hosted checkout.

## Authentication

Endpoints under `/api/v1` take a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

The payment webhook is the exception; it is authenticated by the gateway's
HMAC signature instead.

## Error Handling

Errors share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Validation error: Cart is empty",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

`POST /orders/{id}/verify-payment` answers 400 with
`Payment not successful yet. Please try again.` while the gateway has no
successful attempt; the call can simply be repeated.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "cart", description = "Shopping cart"),
        (name = "orders", description = "Checkout, payment verification and order queries"),
        (name = "payments", description = "Payment gateway callbacks")
    ),
    paths(
        // Cart
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_cart_item,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,
        crate::handlers::carts::clear_cart,
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::verify_payment,
        crate::handlers::orders::mark_delivered,
        // Webhooks
        crate::handlers::payment_webhooks::cashfree_webhook,
    ),
    components(
        schemas(
            crate::services::commerce::AddToCartInput,
            crate::services::commerce::UpdateCartItemInput,
            crate::services::commerce::CartLine,
            crate::services::commerce::CartView,
            crate::services::commerce::PriceBreakdown,
            crate::services::commerce::CreateOrderInput,
            crate::services::commerce::CreatedOrder,
            crate::services::commerce::OrderView,
            crate::services::commerce::order_service::OrderItemView,
            crate::services::commerce::WebhookAck,
            crate::handlers::orders::PaymentVerified,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders/{id}/verify-payment"));
        assert!(json.contains("/api/v1/cart/items/{item_id}"));
        assert!(json.contains("\"Bearer\""));
    }
}
