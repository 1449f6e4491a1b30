//! Persistence for the API.
//!
//! # Tables
//!
//! - `orders`, `order_items` - paid orders and their purchased lines
//! - `products` - catalogue rows (read, plus conditional stock decrements)
//! - `notifications` - admin feed and buyer notices
//! - `carts`, `cart_items`, `wishlists`, `wishlist_items`
//! - `order_settings` - the single "ordering enabled" switch
//! - `users` - read for identity, e-mail targeting and admin fan-out
//!
//! Services talk to the store through the traits below. [`PgStore`] is the
//! production implementation; [`MemoryStore`] backs tests and local demos.
//!
//! # Migrations
//!
//! Migrations live in `crates/api/migrations/` and run via:
//! ```bash
//! cargo run -p zandmarket-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;
mod retry;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use zandmarket_core::{CartItemId, NotificationId, NotificationKind, OrderId, ProductId, UserId};

use crate::models::{
    CartLine, MaterializedOrder, NewNotification, NewOrder, Notification, Order, OrderItem,
    OrderView, Product, StatusChange, User, WishlistLine,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use retry::RetryPolicy;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a payment intent already recorded).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map a unique-constraint violation to [`RepositoryError::Conflict`].
pub(crate) fn conflict_on_unique(err: sqlx::Error, what: &str) -> RepositoryError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            RepositoryError::Conflict(what.to_string())
        }
        other => RepositoryError::Database(other),
    }
}

/// Accounts, read-only.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Every account flagged as admin.
    async fn admin_users(&self) -> Result<Vec<User>, RepositoryError>;
}

/// Catalogue reads. Stock is only ever decremented inside
/// [`OrderStore::materialize`].
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Products for the given ids; unknown ids are simply absent.
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError>;
}

/// Orders and the ordering switch.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn ordering_enabled(&self) -> Result<bool, RepositoryError>;

    async fn set_ordering_enabled(&self, enabled: bool) -> Result<(), RepositoryError>;

    async fn find_order_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Insert a paid order, its items and the stock decrements atomically.
    ///
    /// A zero-row decrement is reported in the result, not treated as an
    /// error. A payment intent that already has an order yields
    /// [`RepositoryError::Conflict`] and nothing is written.
    async fn materialize(&self, order: NewOrder) -> Result<MaterializedOrder, RepositoryError>;

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError>;

    /// All orders, newest first, with customer details.
    async fn list_orders(&self) -> Result<Vec<OrderView>, RepositoryError>;

    /// One customer's orders, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<OrderView>, RepositoryError>;

    /// Flip an undelivered order to delivered. `None` when the order was
    /// already delivered (or is gone) at write time.
    async fn mark_delivered(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn update_status(
        &self,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Delete an order and its items. `false` if it did not exist.
    async fn delete_order(&self, id: OrderId) -> Result<bool, RepositoryError>;
}

/// Notification rows.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// An unread notification of `kind` whose `data->>'id'` equals `entity_key`.
    async fn find_unread(
        &self,
        kind: NotificationKind,
        entity_key: &str,
    ) -> Result<Option<Notification>, RepositoryError>;

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, RepositoryError>;

    /// The user's own notifications plus admin broadcasts when `include_broadcast`.
    async fn notifications_for(
        &self,
        user_id: UserId,
        include_broadcast: bool,
    ) -> Result<Vec<Notification>, RepositoryError>;

    async fn mark_read(&self, id: NotificationId) -> Result<Option<Notification>, RepositoryError>;

    /// Mark the user's and broadcast notifications read; returns rows changed.
    async fn mark_all_read(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    async fn delete_notification(&self, id: NotificationId) -> Result<bool, RepositoryError>;
}

/// Per-user cart and wishlist containers.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError>;

    /// Add `quantity` of `product`, creating the cart on first use and
    /// merging with an existing line.
    async fn add_to_cart(
        &self,
        user_id: UserId,
        product: &Product,
        quantity: u32,
    ) -> Result<(), RepositoryError>;

    /// `None` when the item is not in the user's cart.
    async fn set_cart_quantity(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError>;

    async fn remove_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError>;

    /// Delete all lines. `false` if the user never had a cart.
    async fn clear_cart(&self, user_id: UserId) -> Result<bool, RepositoryError>;

    async fn wishlist(&self, user_id: UserId) -> Result<Vec<WishlistLine>, RepositoryError>;

    async fn add_to_wishlist(
        &self,
        user_id: UserId,
        product: &Product,
        quantity: u32,
    ) -> Result<WishlistLine, RepositoryError>;

    /// `false` if the user never had a wishlist.
    async fn remove_from_wishlist(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError>;

    /// `false` if the user never had a wishlist.
    async fn clear_wishlist(&self, user_id: UserId) -> Result<bool, RepositoryError>;
}

/// Everything the API needs from persistence.
#[async_trait]
pub trait Store: UserStore + CatalogStore + OrderStore + NotificationStore + CartStore {
    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
