mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{ConnectionTrait, EntityTrait};
use serde_json::json;
use storefront_api::{
    entities::Product,
    errors::ServiceError,
    services::commerce::{AddToCartInput, CreateOrderInput, UpdateCartItemInput},
};
use uuid::Uuid;

use common::{shopper, TestApp};

fn add(product_id: Uuid, quantity: i32) -> AddToCartInput {
    AddToCartInput {
        product_id,
        quantity,
    }
}

#[tokio::test]
async fn first_access_creates_an_empty_cart() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let carts = &app.state.services.cart;

    let cart = carts.get_cart(user_id).await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.user_id, user_id);
    assert_eq!(cart.prices.items_price, dec!(0));

    // Same cart on the next access
    assert_eq!(carts.get_cart(user_id).await.unwrap().cart_id, cart.cart_id);
}

#[tokio::test]
async fn adding_the_same_product_merges_lines() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let kettle = app.seed_product("Kettle", dec!(200), 5).await;
    let carts = &app.state.services.cart;

    carts.add_item(user_id, add(kettle.id, 2)).await.unwrap();
    let cart = carts.add_item(user_id, add(kettle.id, 1)).await.unwrap();

    assert_eq!(cart.items.len(), 1);
    let line = &cart.items[0];
    assert_eq!(line.quantity, 3);
    assert_eq!(line.name, "Kettle");
    assert_eq!(line.stock, 5);
    assert_eq!(line.unit_price, dec!(200));
    assert_eq!(cart.prices.items_price, dec!(600));
    assert_eq!(cart.prices.total_price, dec!(708));
}

#[tokio::test]
async fn adding_beyond_stock_leaves_cart_untouched() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let kettle = app.seed_product("Kettle", dec!(200), 3).await;
    let carts = &app.state.services.cart;

    assert_matches!(
        carts.add_item(user_id, add(kettle.id, 4)).await,
        Err(ServiceError::InsufficientStock(_))
    );

    carts.add_item(user_id, add(kettle.id, 2)).await.unwrap();
    assert_matches!(
        carts.add_item(user_id, add(kettle.id, 2)).await,
        Err(ServiceError::InsufficientStock(_))
    );

    let cart = carts.get_cart(user_id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
async fn invalid_quantities_and_unknown_products_are_rejected() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let kettle = app.seed_product("Kettle", dec!(200), 3).await;
    let carts = &app.state.services.cart;

    assert_matches!(
        carts.add_item(user_id, add(kettle.id, 0)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        carts.add_item(user_id, add(Uuid::new_v4(), 1)).await,
        Err(ServiceError::NotFound(_))
    );

    let cart = carts.add_item(user_id, add(kettle.id, 1)).await.unwrap();
    let item_id = cart.items[0].item_id;
    assert_matches!(
        carts
            .update_item_quantity(user_id, item_id, UpdateCartItemInput { quantity: 0 })
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn updating_quantity_checks_stock() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let kettle = app.seed_product("Kettle", dec!(200), 3).await;
    let carts = &app.state.services.cart;

    let cart = carts.add_item(user_id, add(kettle.id, 1)).await.unwrap();
    let item_id = cart.items[0].item_id;

    let cart = carts
        .update_item_quantity(user_id, item_id, UpdateCartItemInput { quantity: 3 })
        .await
        .unwrap();
    assert_eq!(cart.items[0].quantity, 3);

    assert_matches!(
        carts
            .update_item_quantity(user_id, item_id, UpdateCartItemInput { quantity: 4 })
            .await,
        Err(ServiceError::InsufficientStock(_))
    );
    assert_eq!(carts.get_cart(user_id).await.unwrap().items[0].quantity, 3);
}

#[tokio::test]
async fn lines_of_another_cart_are_not_found() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();
    let kettle = app.seed_product("Kettle", dec!(200), 3).await;
    let carts = &app.state.services.cart;

    let cart = carts.add_item(owner, add(kettle.id, 1)).await.unwrap();
    let item_id = cart.items[0].item_id;
    carts.get_cart(other).await.unwrap();

    assert_matches!(
        carts.remove_item(other, item_id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        carts
            .update_item_quantity(other, item_id, UpdateCartItemInput { quantity: 1 })
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(carts.get_cart(owner).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn remove_and_clear() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let kettle = app.seed_product("Kettle", dec!(200), 3).await;
    let mug = app.seed_product("Mug", dec!(100), 3).await;
    let carts = &app.state.services.cart;

    carts.add_item(user_id, add(kettle.id, 1)).await.unwrap();
    let cart = carts.add_item(user_id, add(mug.id, 1)).await.unwrap();
    assert_eq!(cart.items.len(), 2);
    let kettle_line = cart
        .items
        .iter()
        .find(|l| l.product_id == kettle.id)
        .unwrap()
        .item_id;

    let cart = carts.remove_item(user_id, kettle_line).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product_id, mug.id);

    let cleared = carts.clear_cart(user_id).await.unwrap();
    assert!(cleared.is_empty());
    assert_eq!(cleared.cart_id, cart.cart_id);
    assert_eq!(carts.get_cart(user_id).await.unwrap().cart_id, cart.cart_id);
}

#[tokio::test]
async fn clearing_a_missing_cart_is_not_found() {
    let app = TestApp::new().await;
    assert_matches!(
        app.state.services.cart.clear_cart(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn merged_quantity_overflow_is_insufficient_stock() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let pallet = app.seed_product("Pallet", dec!(1), i32::MAX).await;
    let carts = &app.state.services.cart;

    carts.add_item(user_id, add(pallet.id, i32::MAX)).await.unwrap();
    let err = carts.add_item(user_id, add(pallet.id, 1)).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let cart = carts.get_cart(user_id).await.unwrap();
    assert_eq!(cart.items[0].quantity, i32::MAX);
}

#[tokio::test]
async fn line_for_a_withdrawn_product_is_shown_unavailable() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let kettle = app.seed_product("Kettle", dec!(200), 5).await;
    let mug = app.seed_product("Mug", dec!(100), 5).await;
    let carts = &app.state.services.cart;
    carts.add_item(user_id, add(kettle.id, 1)).await.unwrap();
    carts.add_item(user_id, add(mug.id, 1)).await.unwrap();

    // Remove the product without letting the foreign key cascade to the cart
    let db = &*app.state.db;
    db.execute_unprepared("PRAGMA foreign_keys = OFF").await.unwrap();
    Product::delete_by_id(kettle.id).exec(db).await.unwrap();

    let cart = carts.get_cart(user_id).await.unwrap();
    assert_eq!(cart.items.len(), 2);
    let withdrawn = cart.items.iter().find(|l| l.product_id == kettle.id).unwrap();
    assert!(!withdrawn.available);
    assert_eq!(withdrawn.stock, 0);
    assert!(cart.items.iter().any(|l| l.product_id == mug.id && l.available));
    assert_eq!(cart.prices.items_price, dec!(100));

    let err = app
        .state
        .services
        .orders
        .create_order(
            &shopper(user_id),
            CreateOrderInput {
                shipping_address: json!({"city": "Pune"}),
            },
            "https://shop.test",
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let cart = carts.remove_item(user_id, withdrawn.item_id).await.unwrap();
    assert!(cart.items.iter().all(|l| l.available));
}
