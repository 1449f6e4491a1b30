//! Order administration and the customer's view of their orders.

use thiserror::Error;
use tracing::{info, instrument, warn};
use zandmarket_core::{OrderId, OrderStatus};

use super::email::{self, Mailer};
use crate::db::{RepositoryError, Store};
use crate::models::{Order, OrderLines, OrderView, StatusChange, User};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order not found")]
    NotFound,

    #[error("not allowed to change this order")]
    Forbidden,

    #[error("{0}")]
    InvalidStatus(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct OrderService<'a> {
    store: &'a dyn Store,
    mailer: &'a dyn Mailer,
    frontend_url: &'a str,
}

impl<'a> OrderService<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn Store, mailer: &'a dyn Mailer, frontend_url: &'a str) -> Self {
        Self {
            store,
            mailer,
            frontend_url,
        }
    }

    /// Every order, newest first. Admin only; the route enforces it.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn list_all(&self) -> Result<Vec<OrderView>, OrderError> {
        Ok(self.store.list_orders().await?)
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn list_for(&self, user: &User) -> Result<Vec<OrderView>, OrderError> {
        Ok(self.store.orders_for_user(user.id).await?)
    }

    /// One order with its lines. Other customers' orders read as missing.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] when absent or not visible to `user`.
    pub async fn get_for(&self, user: &User, id: OrderId) -> Result<OrderView, OrderError> {
        let order = self.visible_order(user, id).await?;
        let items = self.store.order_items(id).await?;
        let lines = OrderLines::resolve(items, order.cart_items.as_ref());

        Ok(OrderView {
            order,
            customer_name: None,
            customer_email: None,
            lines,
        })
    }

    /// Move an order to `status` and tell the buyer.
    ///
    /// # Errors
    ///
    /// [`OrderError::InvalidStatus`] for an unknown status name,
    /// [`OrderError::NotFound`] for an unknown order.
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: OrderId, status: &str) -> Result<Order, OrderError> {
        let status: OrderStatus = status.parse().map_err(OrderError::InvalidStatus)?;

        let order = self
            .store
            .update_status(id, StatusChange::to(status))
            .await?
            .ok_or(OrderError::NotFound)?;
        info!(order_id = %id, status = %order.status, "Order status updated");

        self.notify_status(&order).await;
        Ok(order)
    }

    /// The customer (or an admin) says the parcel arrived.
    ///
    /// Already-delivered orders are returned unchanged.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] for an unknown order, [`OrderError::Forbidden`]
    /// when `user` neither owns it nor is an admin.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn mark_received(&self, user: &User, id: OrderId) -> Result<Order, OrderError> {
        let order = self
            .store
            .find_order(id)
            .await?
            .ok_or(OrderError::NotFound)?;
        if order.user_id != user.id && !user.is_admin {
            return Err(OrderError::Forbidden);
        }
        if order.is_delivered {
            return Ok(order);
        }

        match self.store.mark_delivered(id).await? {
            Some(delivered) => {
                info!(order_id = %id, "Order marked received");
                Ok(delivered)
            }
            // Lost a race with another confirmation.
            None => self.store.find_order(id).await?.ok_or(OrderError::NotFound),
        }
    }

    /// # Errors
    ///
    /// [`OrderError::NotFound`] for an unknown order.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: OrderId) -> Result<(), OrderError> {
        if self.store.delete_order(id).await? {
            info!(order_id = %id, "Order deleted");
            Ok(())
        } else {
            Err(OrderError::NotFound)
        }
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn ordering_enabled(&self) -> Result<bool, OrderError> {
        Ok(self.store.ordering_enabled().await?)
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    #[instrument(skip(self))]
    pub async fn set_ordering_enabled(&self, enabled: bool) -> Result<(), OrderError> {
        self.store.set_ordering_enabled(enabled).await?;
        info!(enabled, "Ordering switch changed");
        Ok(())
    }

    async fn visible_order(&self, user: &User, id: OrderId) -> Result<Order, OrderError> {
        match self.store.find_order(id).await? {
            Some(order) if order.user_id == user.id || user.is_admin => Ok(order),
            _ => Err(OrderError::NotFound),
        }
    }

    async fn notify_status(&self, order: &Order) {
        let buyer = match self.store.find_user(order.user_id).await {
            Ok(Some(buyer)) => buyer,
            Ok(None) => {
                warn!(order_id = %order.id, "Order owner no longer exists, status e-mail skipped");
                return;
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Failed to load order owner");
                return;
            }
        };

        let track_url = format!("{}/orders/{}", self.frontend_url, order.id);
        let confirm_url = match (order.status, order.delivery_token.as_deref()) {
            (OrderStatus::Shipped, Some(token)) => Some(format!(
                "{}/orders/{}/confirm-delivery?token={token}",
                self.frontend_url, order.id
            )),
            _ => None,
        };

        let sent = match email::status_update(&buyer, order, &track_url, confirm_url.as_deref()) {
            Ok(message) => self.mailer.send(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(order_id = %order.id, error = %e, "Failed to send status e-mail");
        }
    }
}
