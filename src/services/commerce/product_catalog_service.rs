use crate::{
    entities::{product, Product, ProductModel},
    errors::ServiceError,
};
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Product lookups for the cart and checkout, plus the one stock mutation
/// the order flow is allowed to make.
pub async fn find_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<Option<ProductModel>, ServiceError> {
    Ok(Product::find_by_id(product_id).one(conn).await?)
}

/// Loads a set of products keyed by id. Missing ids are simply absent.
pub async fn find_products<C: ConnectionTrait>(
    conn: &C,
    product_ids: &[Uuid],
) -> Result<HashMap<Uuid, ProductModel>, ServiceError> {
    if product_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let products = Product::find()
        .filter(product::Column::Id.is_in(product_ids.iter().copied()))
        .all(conn)
        .await?;
    Ok(products.into_iter().map(|p| (p.id, p)).collect())
}

/// Atomically subtracts `quantity` from a product's stock.
///
/// Runs as a single `UPDATE ... SET stock = stock - q WHERE id = ? AND stock >= q`,
/// so concurrent callers can never drive stock below zero. Zero affected rows
/// means the product vanished or has too little stock; callers holding a
/// transaction must roll it back.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(format!(
            "Invalid quantity {} for product {}",
            quantity, product_id
        )));
    }

    let result = Product::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(%product_id, quantity, "stock decrement refused");
        return Err(ServiceError::InsufficientStock(format!(
            "Not enough stock for product {}",
            product_id
        )));
    }

    debug!(%product_id, quantity, "stock decremented");
    Ok(())
}
