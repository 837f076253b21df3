use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        pricing_service::{calculate_pricing, PriceBreakdown},
        product_catalog_service::{find_product, find_products},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Per-user shopping cart.
///
/// Every user has at most one cart, created lazily on first access. Stock
/// checks made here are advisory: the binding guard is the conditional
/// decrement applied when an order is paid.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Input for adding an item to the cart
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// Input for changing a line's quantity
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemInput {
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// One cart line joined with current product data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub unit_price: Decimal,
    pub image: Option<String>,
    /// Stock currently on hand
    pub stock: i32,
    pub quantity: i32,
    /// False once the product has left the catalog. Such a line is priced at
    /// zero and blocks checkout until it is removed.
    pub available: bool,
}

/// Cart with its lines and a price preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub cart_id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartLine>,
    pub prices: PriceBreakdown,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the caller's cart, creating an empty one on first access.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create_cart(user_id).await?;
        cart_view(&*self.db, &cart).await
    }

    /// Adds a product, merging into an existing line for the same product.
    ///
    /// Rejected with `InsufficientStock` when stock is below the requested
    /// quantity, or below the merged quantity. The cart is untouched on
    /// rejection.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;
        let cart = self.get_or_create_cart(user_id).await?;

        let txn = self.db.begin().await?;

        let product = find_product(&txn, input.product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        if product.stock < input.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} in stock",
                product.stock, product.name
            )));
        }

        let existing_item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&txn)
            .await?;

        let now = Utc::now();
        if let Some(item) = existing_item {
            let Some(merged) = item
                .quantity
                .checked_add(input.quantity)
                .filter(|merged| *merged <= product.stock)
            else {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} of {} in stock, {} already in cart",
                    product.stock, product.name, item.quantity
                )));
            };
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(merged);
            item.updated_at = Set(now);
            item.update(&txn).await?;
        } else {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(input.product_id),
                quantity: Set(input.quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        touch_cart(&txn, &cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: input.product_id,
                quantity: input.quantity,
            })
            .await;

        info!(
            "Added item to cart {}: product {} x{}",
            cart.id, input.product_id, input.quantity
        );
        cart_view(&*self.db, &cart).await
    }

    /// Sets a line's quantity. A product that no longer exists counts as
    /// having no stock.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        input: UpdateCartItemInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let cart = find_user_cart(&txn, user_id).await?;
        let item = find_cart_item(&txn, cart.id, item_id).await?;

        let stock = find_product(&txn, item.product_id)
            .await?
            .map(|p| p.stock)
            .unwrap_or(0);
        if stock < input.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of product {} in stock",
                stock, item.product_id
            )));
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(input.quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        touch_cart(&txn, &cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id: cart.id,
                item_id,
                quantity: input.quantity,
            })
            .await;

        cart_view(&*self.db, &cart).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = find_user_cart(&txn, user_id).await?;
        let item = find_cart_item(&txn, cart.id, item_id).await?;

        CartItem::delete_by_id(item.id).exec(&txn).await?;
        touch_cart(&txn, &cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                item_id,
            })
            .await;

        cart_view(&*self.db, &cart).await
    }

    /// Empties the cart; the cart record itself is kept.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = find_user_cart(&txn, user_id).await?;
        clear_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;

        Ok(CartView {
            cart_id: cart.id,
            user_id: cart.user_id,
            items: Vec::new(),
            prices: calculate_pricing(std::iter::empty()),
        })
    }

    async fn get_or_create_cart(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        if let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        {
            return Ok(cart);
        }

        let now = Utc::now();
        let inserted = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match inserted {
            Ok(cart) => {
                self.event_sender
                    .send_or_log(Event::CartCreated {
                        cart_id: cart.id,
                        user_id,
                    })
                    .await;
                Ok(cart)
            }
            // Lost a race against a concurrent first access
            Err(err) => {
                debug!(error = %err, %user_id, "cart insert failed, re-reading");
                Cart::find()
                    .filter(cart::Column::UserId.eq(user_id))
                    .one(&*self.db)
                    .await?
                    .ok_or(ServiceError::DatabaseError(err))
            }
        }
    }
}

/// The user's cart, without creating one.
pub async fn find_user_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<CartModel, ServiceError> {
    Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))
}

/// Cart lines in insertion order
pub async fn cart_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<CartItemModel>, ServiceError> {
    Ok(CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Deletes the given lines of a cart; lines added since they were read stay.
pub async fn remove_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    item_ids: &[Uuid],
) -> Result<u64, ServiceError> {
    if item_ids.is_empty() {
        return Ok(0);
    }
    let result = CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::Id.is_in(item_ids.iter().copied()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

pub async fn clear_items<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<u64, ServiceError> {
    let result = CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

async fn find_cart_item<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    item_id: Uuid,
) -> Result<CartItemModel, ServiceError> {
    CartItem::find_by_id(item_id)
        .filter(cart_item::Column::CartId.eq(cart_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))
}

async fn touch_cart<C: ConnectionTrait>(conn: &C, cart: &CartModel) -> Result<(), ServiceError> {
    let mut active: cart::ActiveModel = cart.clone().into();
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(())
}

async fn cart_view<C: ConnectionTrait>(conn: &C, cart: &CartModel) -> Result<CartView, ServiceError> {
    let items = cart_items(conn, cart.id).await?;
    let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products = find_products(conn, &product_ids).await?;

    let lines: Vec<CartLine> = items
        .into_iter()
        .map(|item| match products.get(&item.product_id) {
            Some(product) => CartLine {
                item_id: item.id,
                product_id: product.id,
                name: product.name.clone(),
                unit_price: product.price,
                image: product.primary_image(),
                stock: product.stock,
                quantity: item.quantity,
                available: true,
            },
            None => CartLine {
                item_id: item.id,
                product_id: item.product_id,
                name: String::new(),
                unit_price: Decimal::ZERO,
                image: None,
                stock: 0,
                quantity: item.quantity,
                available: false,
            },
        })
        .collect();

    let prices = calculate_pricing(
        lines
            .iter()
            .filter(|l| l.available)
            .map(|l| (l.unit_price, l.quantity)),
    );

    Ok(CartView {
        cart_id: cart.id,
        user_id: cart.user_id,
        items: lines,
        prices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_must_be_positive() {
        let input = AddToCartInput {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(input.validate().is_err());
        assert!(UpdateCartItemInput { quantity: -2 }.validate().is_err());
        assert!(UpdateCartItemInput { quantity: 1 }.validate().is_ok());
    }
}
