use crate::{
    auth::AuthUser,
    config::AppConfig,
    entities::{order, order_item, Order, OrderItem, OrderItemModel, OrderModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{
            cart_service::{cart_items, find_user_cart, remove_items},
            pricing_service::calculate_pricing,
            product_catalog_service::{decrement_stock, find_products},
        },
        payments::{
            first_successful, GatewayCustomer, GatewayOrderRequest, GatewayPayment,
            PaymentGateway,
        },
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const PAYMENT_METHOD: &str = "cashfree";
pub const DEFAULT_CUSTOMER_EMAIL: &str = "customer@example.com";
pub const DEFAULT_CUSTOMER_PHONE: &str = "9999999999";
pub const DEFAULT_CUSTOMER_NAME: &str = "Customer";
pub const PAYMENT_PENDING_MESSAGE: &str = "Payment not successful yet. Please try again.";

/// Checkout request body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderInput {
    /// Free-form address object; `name` and `phone` are forwarded to the gateway
    #[schema(value_type = Object, example = json!({"name": "Asha", "phone": "9876543210", "city": "Pune"}))]
    pub shipping_address: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub unit_price: Decimal,
    pub image: Option<String>,
}

impl From<OrderItemModel> for OrderItemView {
    fn from(item: OrderItemModel) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            name: item.name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            image: item.image,
        }
    }
}

/// Order as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    #[schema(value_type = Object)]
    pub shipping_address: Value,
    pub payment_method: String,
    pub items: Vec<OrderItemView>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub items_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub shipping_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub tax_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_price: Decimal,
    pub currency: String,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub payment_provider: Option<String>,
    pub payment_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    fn from_parts(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            items: items.into_iter().map(OrderItemView::from).collect(),
            items_price: order.items_price,
            shipping_price: order.shipping_price,
            tax_price: order.tax_price,
            total_price: order.total_price,
            currency: order.currency,
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            is_delivered: order.is_delivered,
            delivered_at: order.delivered_at,
            payment_provider: order.payment_provider,
            payment_order_id: order.payment_order_id,
            payment_id: order.payment_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Result of checkout: the order plus what the client needs to open the
/// hosted payment page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CreatedOrder {
    pub order: OrderView,
    pub payment_order_id: String,
    pub payment_order_token: Option<String>,
    pub payment_session_id: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 708.0)]
    pub amount: Decimal,
    pub currency: String,
}

/// What a webhook delivery did to the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub order_id: Uuid,
    pub payment_status: String,
    pub applied: bool,
}

/// A page of orders with its total count
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderView>,
    pub total: u64,
}

/// Outcome of [`OrderService::apply_payment`]
#[derive(Debug, Clone)]
pub struct PaymentApplication {
    pub order: OrderView,
    /// This call flipped the paid flag and took the stock
    pub applied: bool,
}

/// Checkout, payment verification and order queries.
///
/// Every workflow takes the caller explicitly. Stock only moves in
/// [`OrderService::apply_payment`], inside the same transaction that flips
/// `is_paid`, so a payment is applied at most once.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            gateway,
        }
    }

    /// Turns the caller's cart into an order and opens a gateway session.
    ///
    /// `origin` is `scheme://host` and prefixes the return and notify URLs.
    /// Nothing is left behind when the gateway is unconfigured or rejects the
    /// session; the cart is only cleared once the session exists.
    #[instrument(skip(self, user, input), fields(user_id = %user.user_id))]
    pub async fn create_order(
        &self,
        user: &AuthUser,
        input: CreateOrderInput,
        origin: &str,
    ) -> Result<CreatedOrder, ServiceError> {
        let empty_cart = || ServiceError::ValidationError("Cart is empty".to_string());

        let cart = match find_user_cart(&*self.db, user.user_id).await {
            Ok(cart) => cart,
            Err(ServiceError::NotFound(_)) => return Err(empty_cart()),
            Err(e) => return Err(e),
        };
        let lines = cart_items(&*self.db, cart.id).await?;
        if lines.is_empty() {
            return Err(empty_cart());
        }

        if !input.shipping_address.is_object() {
            return Err(ServiceError::ValidationError(
                "Shipping address must be an object".to_string(),
            ));
        }

        let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products = find_products(&*self.db, &product_ids).await?;

        let mut snapshot = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = products.get(&line.product_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", line.product_id))
            })?;
            if line.quantity > product.stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} of {} in stock",
                    product.stock, product.name
                )));
            }
            snapshot.push((product.clone(), line.quantity));
        }

        let prices = calculate_pricing(snapshot.iter().map(|(p, qty)| (p.price, *qty)));

        if !self.gateway.is_configured() {
            return Err(ServiceError::ConfigurationError(
                "Cashfree credentials are not configured".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let currency = self.config.payments.currency.clone();

        let txn = self.db.begin().await?;
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user.user_id),
            shipping_address: Set(input.shipping_address.clone()),
            payment_method: Set(PAYMENT_METHOD.to_string()),
            items_price: Set(prices.items_price),
            shipping_price: Set(prices.shipping_price),
            tax_price: Set(prices.tax_price),
            total_price: Set(prices.total_price),
            currency: Set(currency.clone()),
            is_paid: Set(false),
            paid_at: Set(None),
            is_delivered: Set(false),
            delivered_at: Set(None),
            payment_provider: Set(None),
            payment_order_id: Set(None),
            payment_order_token: Set(None),
            payment_session_id: Set(None),
            payment_id: Set(None),
            payment_signature: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(snapshot.len());
        for (product, quantity) in &snapshot {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                name: Set(product.name.clone()),
                quantity: Set(*quantity),
                unit_price: Set(product.price),
                image: Set(product.primary_image()),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }
        txn.commit().await?;

        let request = GatewayOrderRequest {
            order_id: order_id.to_string(),
            amount: prices.gateway_amount(),
            currency: currency.clone(),
            note: self.config.payments.order_note.clone(),
            customer: customer_details(user, &input.shipping_address),
            return_url: format!("{}/orders/{}", origin, order_id),
            notify_url: format!("{}/api/v1/orders/{}/webhook", origin, order_id),
        };

        let session = match self.gateway.create_order(&request).await {
            Ok(session) => session,
            Err(err) => {
                error!(%order_id, error = %err, "payment session creation failed, discarding order");
                if let Err(cleanup) = self.discard_order(order_id).await {
                    error!(%order_id, error = %cleanup, "failed to discard order");
                }
                return Err(err);
            }
        };

        let mut active: order::ActiveModel = order.into();
        active.payment_provider = Set(Some(self.gateway.provider().to_string()));
        active.payment_order_id = Set(Some(session.gateway_order_id.clone()));
        active.payment_order_token = Set(session.order_token.clone());
        active.payment_session_id = Set(session.payment_session_id.clone());
        active.updated_at = Set(Utc::now());
        let order = active.update(&*self.db).await?;

        let ordered: Vec<Uuid> = lines.iter().map(|l| l.id).collect();
        remove_items(&*self.db, cart.id, &ordered).await?;

        counter!("storefront_orders.created", 1);
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                user_id: user.user_id,
                total_price: prices.total_price,
            })
            .await;
        self.event_sender
            .send_or_log(Event::PaymentSessionCreated {
                order_id,
                payment_order_id: session.gateway_order_id.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;

        info!(%order_id, total = %prices.total_price, "order created");

        Ok(CreatedOrder {
            order: OrderView::from_parts(order, items),
            payment_order_id: session.gateway_order_id,
            payment_order_token: session.order_token,
            payment_session_id: session.payment_session_id,
            amount: prices.gateway_amount(),
            currency,
        })
    }

    /// Client-triggered reconciliation against the gateway.
    ///
    /// An already-paid order is returned as-is without asking the gateway.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn verify_payment(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let order = self.find_order(order_id).await?;
        if order.user_id != user.user_id {
            return Err(ServiceError::Forbidden("Not authorized".to_string()));
        }
        let gateway_order_id = order
            .payment_order_id
            .clone()
            .ok_or_else(|| ServiceError::ValidationError("Cashfree order is missing".to_string()))?;

        if order.is_paid {
            return self.order_view(order).await;
        }

        if !self.gateway.is_configured() {
            return Err(ServiceError::ConfigurationError(
                "Cashfree credentials are not configured".to_string(),
            ));
        }

        let attempts = self.gateway.list_payments(&gateway_order_id).await?;
        let Some(payment) = first_successful(&attempts) else {
            info!(%order_id, attempts = attempts.len(), "payment not completed yet");
            counter!("storefront_payments.pending", 1);
            self.event_sender
                .send_or_log(Event::PaymentPending {
                    order_id,
                    payment_order_id: gateway_order_id,
                })
                .await;
            return Err(ServiceError::PaymentPending(PAYMENT_PENDING_MESSAGE.to_string()));
        };

        Ok(self.apply_payment(order_id, payment).await?.order)
    }

    /// Server-to-server notification from the gateway.
    ///
    /// `payload` must be the raw request body; the signature covers its bytes.
    #[instrument(skip(self, signature, payload))]
    pub async fn handle_webhook(
        &self,
        order_id: Uuid,
        timestamp: &str,
        signature: &str,
        payload: &[u8],
    ) -> Result<WebhookAck, ServiceError> {
        if !self
            .gateway
            .verify_webhook_signature(timestamp, payload, signature)
        {
            warn!(%order_id, "webhook signature rejected");
            return Err(ServiceError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }

        let notification = self.gateway.parse_webhook(payload)?;
        let order = self.find_order(order_id).await?;

        if order.payment_order_id.as_deref() != Some(notification.gateway_order_id.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "Webhook order {} does not match order {}",
                notification.gateway_order_id, order_id
            )));
        }

        let payment_status = notification.payment.status.clone();
        if !notification.payment.is_successful() {
            info!(
                %order_id,
                status = %payment_status,
                event_type = ?notification.event_type,
                "webhook acknowledged without payment"
            );
            return Ok(WebhookAck {
                order_id,
                payment_status,
                applied: false,
            });
        }

        let outcome = self.apply_payment(order_id, &notification.payment).await?;
        Ok(WebhookAck {
            order_id,
            payment_status,
            applied: outcome.applied,
        })
    }

    /// Marks the order paid and takes its items out of stock, atomically.
    ///
    /// The paid flag is flipped with `WHERE is_paid = false`; when another
    /// path got there first nothing else happens and the current order is
    /// returned. If any line cannot be covered by stock the transaction is
    /// rolled back and the order stays unpaid.
    #[instrument(skip(self, payment), fields(payment_id = ?payment.payment_id))]
    pub async fn apply_payment(
        &self,
        order_id: Uuid,
        payment: &GatewayPayment,
    ) -> Result<PaymentApplication, ServiceError> {
        let paid_at = payment.paid_at.unwrap_or_else(Utc::now);
        let txn = self.db.begin().await?;

        let flipped = Order::update_many()
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .col_expr(order::Column::PaidAt, Expr::value(Some(paid_at)))
            .col_expr(order::Column::PaymentId, Expr::value(payment.payment_id.clone()))
            .col_expr(
                order::Column::PaymentSignature,
                Expr::value(payment.signature.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::IsPaid.eq(false))
            .exec(&txn)
            .await?;

        if flipped.rows_affected == 0 {
            txn.rollback().await?;
            info!(%order_id, "payment already applied");
            let order = self.find_order(order_id).await?;
            return Ok(PaymentApplication {
                order: self.order_view(order).await?,
                applied: false,
            });
        }

        let items = order_items(&txn, order_id).await?;
        for item in &items {
            if let Err(err) = decrement_stock(&txn, item.product_id, item.quantity).await {
                txn.rollback().await?;
                warn!(%order_id, product_id = %item.product_id, "payment not applied: {}", err);
                return Err(err);
            }
        }
        txn.commit().await?;

        counter!("storefront_payments.applied", 1);
        for item in &items {
            self.event_sender
                .send_or_log(Event::StockDecremented {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id,
                payment_id: payment.payment_id.clone(),
                paid_at,
            })
            .await;

        info!(%order_id, "payment applied");
        let order = self.find_order(order_id).await?;
        Ok(PaymentApplication {
            order: OrderView::from_parts(order, items),
            applied: true,
        })
    }

    /// Visible to its owner and to admins
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn get_order(&self, user: &AuthUser, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.find_order(order_id).await?;
        if order.user_id != user.user_id && !user.is_admin() {
            return Err(ServiceError::Forbidden("Not authorized".to_string()));
        }
        self.order_view(order).await
    }

    /// The caller's orders, newest first
    pub async fn list_my_orders(&self, user: &AuthUser) -> Result<Vec<OrderView>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user.user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.order_views(orders).await
    }

    /// All orders, newest first. `page` starts at 1.
    pub async fn list_all_orders(&self, page: u64, per_page: u64) -> Result<OrderPage, ServiceError> {
        let paginator = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(OrderPage {
            orders: self.order_views(orders).await?,
            total,
        })
    }

    #[instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.find_order(order_id).await?;
        let now = Utc::now();

        let mut active: order::ActiveModel = order.into();
        active.is_delivered = Set(true);
        active.delivered_at = Set(Some(now));
        active.updated_at = Set(now);
        let order = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderDelivered(order_id))
            .await;
        self.order_view(order).await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn order_view(&self, order: OrderModel) -> Result<OrderView, ServiceError> {
        let items = order_items(&*self.db, order.id).await?;
        Ok(OrderView::from_parts(order, items))
    }

    async fn order_views(&self, orders: Vec<OrderModel>) -> Result<Vec<OrderView>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut grouped: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
        for item in OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .all(&*self.db)
            .await?
        {
            grouped.entry(item.order_id).or_default().push(item);
        }
        Ok(orders
            .into_iter()
            .map(|order| {
                let items = grouped.remove(&order.id).unwrap_or_default();
                OrderView::from_parts(order, items)
            })
            .collect())
    }

    async fn discard_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        OrderItem::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        Order::delete_by_id(order_id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }
}

async fn order_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?)
}

fn address_field(address: &Value, key: &str) -> Option<String> {
    address
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Gateway customer block, with fallbacks for anything the shopper left out
pub fn customer_details(user: &AuthUser, address: &Value) -> GatewayCustomer {
    GatewayCustomer {
        id: user.user_id.to_string(),
        email: user
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_CUSTOMER_EMAIL.to_string()),
        phone: address_field(address, "phone")
            .unwrap_or_else(|| DEFAULT_CUSTOMER_PHONE.to_string()),
        name: address_field(address, "name")
            .or_else(|| user.name.clone().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: Option<&str>, email: Option<&str>) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            name: name.map(str::to_owned),
            email: email.map(str::to_owned),
            roles: vec![],
            token_id: "t".into(),
        }
    }

    #[test]
    fn customer_details_prefer_address_then_identity() {
        let u = user(Some("Ravi"), Some("ravi@example.com"));
        let c = customer_details(&u, &json!({"name": "Asha", "phone": "9876543210"}));
        assert_eq!(c.id, u.user_id.to_string());
        assert_eq!(c.email, "ravi@example.com");
        assert_eq!(c.phone, "9876543210");
        assert_eq!(c.name, "Asha");

        let c = customer_details(&u, &json!({}));
        assert_eq!(c.name, "Ravi");
        assert_eq!(c.phone, DEFAULT_CUSTOMER_PHONE);
    }

    #[test]
    fn customer_details_fall_back_to_placeholders() {
        let c = customer_details(&user(None, None), &json!({"name": "  ", "phone": 12}));
        assert_eq!(c.email, DEFAULT_CUSTOMER_EMAIL);
        assert_eq!(c.phone, DEFAULT_CUSTOMER_PHONE);
        assert_eq!(c.name, DEFAULT_CUSTOMER_NAME);
    }
}
