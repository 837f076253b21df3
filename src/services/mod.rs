// Commerce: carts, orders, pricing, stock
pub mod commerce;

// Payment gateway integration
pub mod payments;
