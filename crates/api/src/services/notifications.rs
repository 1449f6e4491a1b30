//! Notification emitter and the notification feed.

use serde_json::json;
use tracing::{debug, instrument};
use zandmarket_core::{Money, NotificationId, NotificationKind, ProductId};

use super::inventory::LOW_STOCK_THRESHOLD;
use crate::db::{RepositoryError, Store};
use crate::models::{LineItem, NewNotification, Notification, Order, User};

/// `triggered_by` for notifications raised by the pipeline itself.
pub const SYSTEM: &str = "System";

pub struct NotificationEmitter<'a> {
    store: &'a dyn Store,
}

impl<'a> NotificationEmitter<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Write `new` unless it is redundant.
    ///
    /// Stock notices at or above the threshold return `None`. A notice whose
    /// kind and entity id match an unread one returns the existing row. The
    /// lookup and insert are not atomic, so two racing emits can both insert.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    #[instrument(skip(self, new), fields(kind = %new.kind))]
    pub async fn emit(&self, new: NewNotification) -> Result<Option<Notification>, RepositoryError> {
        if new.kind == NotificationKind::Stock
            && new
                .data
                .get("stock")
                .and_then(serde_json::Value::as_i64)
                .is_some_and(|stock| stock >= i64::from(LOW_STOCK_THRESHOLD))
        {
            debug!("Stock level healthy, notice suppressed");
            return Ok(None);
        }

        if let Some(key) = new.entity_key() {
            if let Some(existing) = self.store.find_unread(new.kind, &key).await? {
                debug!(notification_id = %existing.id, "Unread duplicate exists");
                return Ok(Some(existing));
            }
        }

        self.store.insert_notification(new).await.map(Some)
    }

    /// The user's own notifications, plus broadcasts for admins.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn feed(&self, user: &User) -> Result<Vec<Notification>, RepositoryError> {
        self.store.notifications_for(user.id, user.is_admin).await
    }

    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] for an unknown id.
    pub async fn mark_read(&self, id: NotificationId) -> Result<Notification, RepositoryError> {
        self.store
            .mark_read(id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn mark_all_read(&self, user: &User) -> Result<u64, RepositoryError> {
        self.store.mark_all_read(user.id).await
    }

    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] for an unknown id.
    pub async fn delete(&self, id: NotificationId) -> Result<(), RepositoryError> {
        if self.store.delete_notification(id).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

/// Admin broadcast for a newly paid order.
#[must_use]
pub fn order_placed(
    order: &Order,
    customer_name: &str,
    items: &[LineItem],
    shipping_fee: Money,
) -> NewNotification {
    NewNotification {
        user_id: None,
        kind: NotificationKind::Order,
        title: "New Order Received".to_string(),
        message: format!("Order {} placed.", order.order_number),
        data: json!({
            "id": order.id,
            "order_number": order.order_number,
            "customer_name": customer_name,
            "items": items,
            "shipping_fee": shipping_fee,
        }),
        triggered_by: SYSTEM.to_string(),
    }
}

/// The buyer's own confirmation.
#[must_use]
pub fn order_confirmed(order: &Order) -> NewNotification {
    NewNotification {
        user_id: Some(order.user_id),
        kind: NotificationKind::OrderConfirmed,
        title: "Order Confirmed".to_string(),
        message: format!(
            "Your order {} has been paid and is being processed.",
            order.order_number
        ),
        data: json!({
            "id": order.id,
            "order_number": order.order_number,
            "total_amount": order.total_amount,
        }),
        triggered_by: SYSTEM.to_string(),
    }
}

/// Admin broadcast for a product running low.
#[must_use]
pub fn low_stock(product_id: ProductId, name: &str, remaining: i32) -> NewNotification {
    NewNotification {
        user_id: None,
        kind: NotificationKind::Stock,
        title: "Low Stock".to_string(),
        message: format!("{name} has only {remaining} left in stock."),
        data: json!({
            "id": product_id,
            "name": name,
            "stock": remaining,
        }),
        triggered_by: SYSTEM.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use zandmarket_core::{Email, UserId};

    use super::*;
    use crate::db::{MemoryStore, NotificationStore};

    #[tokio::test]
    async fn healthy_stock_is_suppressed() {
        let store = MemoryStore::new();
        let emitter = NotificationEmitter::new(&store);

        assert!(emitter.emit(low_stock(ProductId::new(1), "Tea", 5)).await.unwrap().is_none());
        assert!(emitter.emit(low_stock(ProductId::new(1), "Tea", 4)).await.unwrap().is_some());
        assert_eq!(store.notifications().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unread_duplicates_are_returned_instead_of_inserted() {
        let store = MemoryStore::new();
        let emitter = NotificationEmitter::new(&store);

        let first = emitter.emit(low_stock(ProductId::new(9), "Tea", 2)).await.unwrap().unwrap();
        let again = emitter.emit(low_stock(ProductId::new(9), "Tea", 1)).await.unwrap().unwrap();
        assert_eq!(first.id, again.id);

        // Once read, a fresh notice is allowed.
        store.mark_read(first.id).await.unwrap();
        let fresh = emitter.emit(low_stock(ProductId::new(9), "Tea", 1)).await.unwrap().unwrap();
        assert_ne!(fresh.id, first.id);
        assert_eq!(store.notifications().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn feed_includes_broadcasts_for_admins_only() {
        let store = MemoryStore::new();
        let emitter = NotificationEmitter::new(&store);
        emitter.emit(low_stock(ProductId::new(1), "Tea", 0)).await.unwrap();

        let admin = User {
            id: UserId::new(1),
            name: "Admin".into(),
            email: Email::parse("admin@example.com").unwrap(),
            is_admin: true,
        };
        let buyer = User {
            id: UserId::new(2),
            is_admin: false,
            ..admin.clone()
        };

        assert_eq!(emitter.feed(&admin).await.unwrap().len(), 1);
        assert!(emitter.feed(&buyer).await.unwrap().is_empty());
        assert_eq!(emitter.mark_all_read(&admin).await.unwrap(), 1);
        assert!(matches!(
            emitter.delete(NotificationId::new(999)).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
