//! Domain models shared by the stores, services and routes.

pub mod cart;
pub mod notification;
pub mod order;
pub mod product;
pub mod user;

pub use cart::{CartLine, CartView, WishlistLine};
pub use notification::{NewNotification, Notification};
pub use order::{
    LineItem, MAX_LINE_QUANTITY, MaterializedOrder, NewOrder, Order, OrderItem, OrderLines, OrderView,
    PAYMENT_METHOD_STRIPE, StatusChange,
};
pub use product::{Product, StockAdjustment, StockOutcome};
pub use user::User;
