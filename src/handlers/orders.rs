use crate::handlers::common::{
    created_response, map_service_error, request_origin, success_response, PaginationParams,
};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::commerce::order_service::{CreateOrderInput, CreatedOrder, OrderView},
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::HeaderMap,
    response::Response,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Body returned by payment verification
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentVerified {
    #[schema(example = "Payment verified")]
    pub message: String,
    pub order: OrderView,
}

/// Check out the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Creates an order from the caller's cart and opens a Cashfree payment session",
    request_body = CreateOrderInput,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CreatedOrder>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty cart, bad address or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment gateway not configured", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway rejected the order", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderInput>,
) -> Result<Response, ApiError> {
    let origin = request_origin(&state.config, &headers);

    let created = state
        .services
        .orders
        .create_order(&user, payload, &origin)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(created))
}

/// List every order (admin)
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Paginated list of all orders, newest first",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ApiError> {
    let (page, per_page) = params.resolve(&state.config);

    let result = state
        .services
        .orders
        .list_all_orders(page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        result.orders,
        result.total,
        page,
        per_page,
    )))
}

/// The caller's own orders
#[utoipa::path(
    get,
    path = "/api/v1/orders/myorders",
    summary = "My orders",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    let orders = state
        .services
        .orders
        .list_my_orders(&user)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let order = state
        .services
        .orders
        .get_order(&user, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Reconcile an order with the gateway after checkout
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/verify-payment",
    summary = "Verify payment",
    description = "Checks the gateway for a successful payment and marks the order paid. Safe to repeat.",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment verified", body = ApiResponse<PaymentVerified>),
        (status = 400, description = "Payment pending, missing gateway order or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway error", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let order = state
        .services
        .orders
        .verify_payment(&user, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaymentVerified {
        message: "Payment verified".to_string(),
        order,
    }))
}

/// Mark an order delivered (admin)
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/deliver",
    summary = "Mark delivered",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order delivered", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let order = state
        .services
        .orders
        .mark_delivered(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
