//! Delivery confirmation by capability token.
//!
//! Every paid order gets a random 256-bit token. The shipping e-mail links
//! to `/orders/{id}/confirm-delivery?token=...`; whoever holds the link can
//! mark the order delivered exactly once, without logging in.

use thiserror::Error;
use tracing::{info, instrument};
use zandmarket_core::OrderId;

use crate::db::{RepositoryError, Store};
use crate::models::Order;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("order not found")]
    NotFound,

    #[error("order already marked delivered")]
    AlreadyConfirmed,

    #[error("invalid delivery token")]
    InvalidToken,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A fresh delivery token: 32 random bytes, hex encoded.
#[must_use]
pub fn generate_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

pub struct DeliveryService<'a> {
    store: &'a dyn Store,
}

impl<'a> DeliveryService<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Confirm delivery of `order_id` with the emailed `token`.
    ///
    /// Checks run in order: existence, already delivered, token. The final
    /// write is conditional on the order still being undelivered, so two
    /// concurrent confirmations cannot both succeed.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::NotFound`], [`DeliveryError::AlreadyConfirmed`] or
    /// [`DeliveryError::InvalidToken`] as described; store failures otherwise.
    #[instrument(skip(self, token))]
    pub async fn confirm(&self, order_id: OrderId, token: &str) -> Result<Order, DeliveryError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(DeliveryError::NotFound)?;

        if order.is_delivered {
            return Err(DeliveryError::AlreadyConfirmed);
        }

        let valid = order
            .delivery_token
            .as_deref()
            .is_some_and(|expected| constant_time_compare(expected, token));
        if !valid {
            return Err(DeliveryError::InvalidToken);
        }

        let delivered = self
            .store
            .mark_delivered(order_id)
            .await?
            .ok_or(DeliveryError::AlreadyConfirmed)?;

        info!(%order_id, "Delivery confirmed by customer");
        Ok(delivered)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use zandmarket_core::{Money, UserId};

    use super::*;
    use crate::db::{MemoryStore, OrderStore};
    use crate::models::NewOrder;

    async fn paid_order(store: &MemoryStore, token: &str) -> Order {
        store
            .materialize(NewOrder {
                user_id: UserId::new(1),
                order_number: "ORD100".into(),
                items: Vec::new(),
                shipping_address: "1 High St".into(),
                shipping_fee: Money::ZERO,
                total_amount: Money::ZERO,
                payment_intent_id: format!("pi_{token}"),
                delivery_token: token.into(),
            })
            .await
            .unwrap()
            .order
    }

    #[test]
    fn tokens_are_256_bit_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[tokio::test]
    async fn confirms_once_and_keeps_the_first_timestamp() {
        let store = MemoryStore::new();
        let order = paid_order(&store, "secret").await;
        let service = DeliveryService::new(&store);

        let first = service.confirm(order.id, "secret").await.unwrap();
        assert!(first.is_delivered);

        assert!(matches!(
            service.confirm(order.id, "secret").await,
            Err(DeliveryError::AlreadyConfirmed)
        ));
        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.delivered_at, first.delivered_at);
    }

    #[tokio::test]
    async fn checks_run_in_order() {
        let store = MemoryStore::new();
        let order = paid_order(&store, "secret").await;
        let service = DeliveryService::new(&store);

        assert!(matches!(
            service.confirm(OrderId::new(404), "secret").await,
            Err(DeliveryError::NotFound)
        ));
        assert!(matches!(
            service.confirm(order.id, "wrong").await,
            Err(DeliveryError::InvalidToken)
        ));

        service.confirm(order.id, "secret").await.unwrap();
        // Already delivered wins over a bad token.
        assert!(matches!(
            service.confirm(order.id, "wrong").await,
            Err(DeliveryError::AlreadyConfirmed)
        ));
    }

    #[tokio::test]
    async fn concurrent_confirmations_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let order_id = paid_order(&store, "secret").await.id;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                DeliveryService::new(store.as_ref())
                    .confirm(order_id, "secret")
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
