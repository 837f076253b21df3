/// Commerce services module - cart, checkout and payment application
pub mod cart_service;
pub mod order_service;
pub mod pricing_service;
pub mod product_catalog_service;

// Re-export services for convenience
pub use cart_service::{AddToCartInput, CartLine, CartService, CartView, UpdateCartItemInput};
pub use order_service::{
    CreateOrderInput, CreatedOrder, OrderService, OrderView, PaymentApplication, WebhookAck,
};
pub use pricing_service::{calculate_pricing, PriceBreakdown};
