//! Order reconciliation: a verified payment event becomes a paid order.
//!
//! The payment processor delivers webhooks at least once and in any order,
//! so the pipeline is idempotent on the payment-intent id. The order, its
//! items and the stock decrements are written in one transaction;
//! notifications and e-mails follow the commit and never fail the request.
//!
//! Stages, as traced:
//!
//! ```text
//! IntentCreated -> PaymentConfirmed -> OrderMaterialized -> StockAdjusted -> Notified
//!                                   \-> Aborted (rolled back, processor retries)
//! ```

use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use zandmarket_core::{Money, OrderId, UserId};

use super::delivery::generate_token;
use super::email::{self, Mailer};
use super::inventory;
use super::notifications::{self, NotificationEmitter};
use crate::db::{RepositoryError, Store};
use crate::models::{LineItem, MaterializedOrder, NewOrder, User};
use crate::payments::{CheckoutSessionObject, WebhookEvent};

/// Pipeline stage reached, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    IntentCreated,
    PaymentConfirmed,
    OrderMaterialized,
    StockAdjusted,
    Notified,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a webhook delivery was handled. Every variant answers 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Processed { order_id: OrderId },
    AlreadyProcessed,
    Ignored { reason: String },
}

/// The order as described by checkout-session metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIntent {
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub shipping_address: String,
    pub shipping_fee: Money,
}

impl OrderIntent {
    /// Decode the metadata written at checkout.
    ///
    /// # Errors
    ///
    /// A human-readable reason when a field is missing or unparseable.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self, String> {
        let field = |key: &str| {
            metadata
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| format!("metadata missing {key}"))
        };

        let user_id = field("user_id")?
            .trim()
            .parse::<i32>()
            .map(UserId::new)
            .map_err(|e| format!("metadata user_id: {e}"))?;
        let items: Vec<LineItem> =
            serde_json::from_str(field("items")?).map_err(|e| format!("metadata items: {e}"))?;
        if items.is_empty() {
            return Err("metadata items is empty".to_string());
        }
        let shipping_fee = match metadata.get("shipping_fee").map(|s| s.trim()) {
            None | Some("") => Money::ZERO,
            Some(raw) => raw
                .parse::<rust_decimal::Decimal>()
                .map(Money::new)
                .map_err(|e| format!("metadata shipping_fee: {e}"))?,
        };

        let shipping_address = match metadata.get("shipping_address") {
            Some(address) if !address.trim().is_empty() => address.clone(),
            _ => {
                warn!(%user_id, "Paid session carries no shipping address");
                String::new()
            }
        };

        Ok(Self {
            user_id,
            items,
            shipping_address,
            shipping_fee,
        })
    }

    /// `Σ unit_price × quantity`.
    #[must_use]
    pub fn items_total(&self) -> Money {
        self.items.iter().map(LineItem::line_total).sum()
    }

    #[must_use]
    pub fn total(&self) -> Money {
        (self.items_total() + self.shipping_fee).rounded()
    }
}

/// Display code shown to people. Not unique; the numeric id is the identity.
#[must_use]
pub fn generate_order_number() -> String {
    format!("ORD{}", rand::rng().random_range(100..1000))
}

pub struct ReconciliationService<'a> {
    store: &'a dyn Store,
    mailer: &'a dyn Mailer,
}

impl<'a> ReconciliationService<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn Store, mailer: &'a dyn Mailer) -> Self {
        Self { store, mailer }
    }

    /// Handle one verified webhook event.
    ///
    /// # Errors
    ///
    /// Only failures before the order commit, which the caller answers with
    /// a 5xx so the processor retries.
    pub async fn handle(&self, event: WebhookEvent) -> Result<ReconcileOutcome, RepositoryError> {
        match event {
            WebhookEvent::PaymentSucceeded { event_id, session } => {
                self.reconcile(&event_id, &session).await
            }
            WebhookEvent::AwaitingPayment {
                event_id,
                session_id,
            } => {
                info!(%event_id, %session_id, "Checkout completed, payment still pending");
                Ok(ignored("payment not completed"))
            }
            WebhookEvent::PaymentFailed {
                event_id,
                session_id,
            } => {
                warn!(%event_id, %session_id, "Delayed payment failed");
                Ok(ignored("payment failed"))
            }
            WebhookEvent::Ignored {
                event_id,
                event_type,
            } => {
                debug!(%event_id, %event_type, "Unhandled event type");
                Ok(ignored(&format!("unhandled event type {event_type}")))
            }
        }
    }

    #[instrument(skip(self, session), fields(session_id = %session.id, stage = tracing::field::Empty))]
    async fn reconcile(
        &self,
        event_id: &str,
        session: &CheckoutSessionObject,
    ) -> Result<ReconcileOutcome, RepositoryError> {
        let span = tracing::Span::current();
        span.record("stage", tracing::field::display(Stage::IntentCreated));

        let Some(payment_intent) = session.payment_intent.as_deref() else {
            warn!(%event_id, "Paid session without a payment intent");
            return Ok(ignored("no payment intent"));
        };
        let intent = match OrderIntent::from_metadata(&session.metadata) {
            Ok(intent) => intent,
            Err(reason) => {
                warn!(%event_id, %payment_intent, %reason, "Unusable checkout metadata");
                return Ok(ignored(&reason));
            }
        };

        span.record("stage", tracing::field::display(Stage::PaymentConfirmed));

        if self
            .store
            .find_order_by_payment_intent(payment_intent)
            .await?
            .is_some()
        {
            info!(%payment_intent, "Order already processed");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let Some(buyer) = self.store.find_user(intent.user_id).await? else {
            error!(%payment_intent, user_id = %intent.user_id, "Paid session for unknown user");
            return Ok(ignored("unknown user"));
        };

        let new_order = NewOrder {
            user_id: intent.user_id,
            order_number: generate_order_number(),
            items: intent.items.clone(),
            shipping_address: intent.shipping_address.clone(),
            shipping_fee: intent.shipping_fee,
            total_amount: intent.total(),
            payment_intent_id: payment_intent.to_string(),
            delivery_token: generate_token(),
        };

        let materialized = match self.store.materialize(new_order).await {
            Ok(materialized) => materialized,
            Err(RepositoryError::Conflict(_)) => {
                info!(%payment_intent, "Order already processed (concurrent delivery)");
                return Ok(ReconcileOutcome::AlreadyProcessed);
            }
            Err(e) => {
                span.record("stage", tracing::field::display(Stage::Aborted));
                error!(%payment_intent, error = %e, "Order materialization rolled back");
                return Err(e);
            }
        };
        let order_id = materialized.order.id;
        span.record("stage", tracing::field::display(Stage::OrderMaterialized));

        inventory::report_shortfalls(order_id, &materialized.stock);
        span.record("stage", tracing::field::display(Stage::StockAdjusted));

        self.after_commit(&materialized, &intent, &buyer).await;
        span.record("stage", tracing::field::display(Stage::Notified));

        info!(%order_id, order_number = %materialized.order.order_number, "Order processed");
        Ok(ReconcileOutcome::Processed { order_id })
    }

    /// Notices and e-mails. Failures are logged and swallowed.
    async fn after_commit(&self, materialized: &MaterializedOrder, intent: &OrderIntent, buyer: &User) {
        let order = &materialized.order;
        let emitter = NotificationEmitter::new(self.store);

        let mut notices = vec![
            notifications::order_confirmed(order),
            notifications::order_placed(order, &buyer.name, &intent.items, intent.shipping_fee),
        ];
        notices.extend(
            inventory::low_stock(&materialized.stock).map(|(adjustment, remaining)| {
                notifications::low_stock(adjustment.product_id, &adjustment.product_name, remaining)
            }),
        );
        for notice in notices {
            if let Err(e) = emitter.emit(notice).await {
                warn!(order_id = %order.id, error = %e, "Failed to record notification");
            }
        }

        match email::order_confirmation(buyer, order, &intent.items, intent.shipping_fee) {
            Ok(message) => {
                if let Err(e) = self.mailer.send(message).await {
                    warn!(order_id = %order.id, error = %e, "Failed to send order confirmation");
                }
            }
            Err(e) => warn!(order_id = %order.id, error = %e, "Failed to render order confirmation"),
        }

        let admins = match self.store.admin_users().await {
            Ok(admins) => admins,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Failed to load admins for new-order alert");
                return;
            }
        };
        for admin in &admins {
            let sent = match email::new_order_alert(admin, &buyer.name, order, &intent.items, intent.shipping_fee) {
                Ok(message) => self.mailer.send(message).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!(order_id = %order.id, admin_id = %admin.id, error = %e, "Failed to send new-order alert");
            }
        }
    }
}

fn ignored(reason: &str) -> ReconcileOutcome {
    ReconcileOutcome::Ignored {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use zandmarket_core::{Email, NotificationKind, ProductId};

    use super::*;
    use crate::db::{MemoryStore, OrderStore};
    use crate::models::{OrderLines, Product};
    use crate::services::email::{EmailError, OutgoingEmail};

    #[derive(Default)]
    struct Outbox(Mutex<Vec<OutgoingEmail>>);

    #[async_trait]
    impl Mailer for Outbox {
        async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
            self.0.lock().unwrap().push(email);
            Ok(())
        }
    }

    fn seeded(stock: i32) -> MemoryStore {
        let store = MemoryStore::new();
        for (id, name, admin) in [(7, "Ada", false), (1, "Admin", true)] {
            store
                .insert_user(User {
                    id: UserId::new(id),
                    name: name.into(),
                    email: Email::parse(&format!("{}@example.com", name.to_lowercase())).unwrap(),
                    is_admin: admin,
                })
                .unwrap();
        }
        store
            .insert_product(Product {
                id: ProductId::new(1),
                name: "Tea".into(),
                price: Money::from_minor(1_000),
                discount_percentage: Decimal::ZERO,
                stock: Some(stock),
                unlimited_stock: false,
            })
            .unwrap();
        store
    }

    fn paid(intent: &str, quantity: u32) -> WebhookEvent {
        let items = serde_json::json!([
            {"product_id": 1, "name": "Tea", "price": "10.00", "quantity": quantity}
        ]);
        WebhookEvent::PaymentSucceeded {
            event_id: format!("evt_{intent}"),
            session: CheckoutSessionObject {
                id: format!("cs_{intent}"),
                payment_intent: Some(intent.into()),
                payment_status: Some("paid".into()),
                metadata: HashMap::from([
                    ("user_id".to_string(), "7".to_string()),
                    ("items".to_string(), items.to_string()),
                    ("shipping_address".to_string(), "1 High St".to_string()),
                    ("shipping_fee".to_string(), "1.00".to_string()),
                ]),
            },
        }
    }

    #[tokio::test]
    async fn reference_payment_becomes_one_order() {
        let store = seeded(10);
        let outbox = Outbox::default();
        let service = ReconciliationService::new(&store, &outbox);

        let outcome = service.handle(paid("pi_123", 2)).await.unwrap();
        let ReconcileOutcome::Processed { order_id } = outcome else {
            panic!("expected processed, got {outcome:?}");
        };

        let order = store.find_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.total_amount.to_string(), "21.00");
        assert!(order.is_paid);
        assert_eq!(order.delivery_token.as_deref().map(str::len), Some(64));
        assert!(order.order_number.starts_with("ORD") && order.order_number.len() == 6);
        assert_eq!(store.order_items(order_id).await.unwrap().len(), 1);
        assert_eq!(store.product(ProductId::new(1)).unwrap().unwrap().stock, Some(8));

        let kinds: Vec<NotificationKind> =
            store.notifications().unwrap().iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::OrderConfirmed, NotificationKind::Order]);

        let sent = outbox.0.lock().unwrap();
        let recipients: Vec<&str> = sent.iter().map(|m| m.to.as_str()).collect();
        assert_eq!(recipients, vec!["ada@example.com", "admin@example.com"]);
    }

    #[tokio::test]
    async fn redelivery_is_already_processed() {
        let store = seeded(10);
        let outbox = Outbox::default();
        let service = ReconciliationService::new(&store, &outbox);

        for _ in 0..3 {
            service.handle(paid("pi_123", 2)).await.unwrap();
        }

        assert_eq!(
            service.handle(paid("pi_123", 2)).await.unwrap(),
            ReconcileOutcome::AlreadyProcessed
        );
        assert_eq!(store.orders().unwrap().len(), 1);
        assert_eq!(store.product(ProductId::new(1)).unwrap().unwrap().stock, Some(8));
    }

    #[tokio::test]
    async fn concurrent_deliveries_make_one_order() {
        let store = Arc::new(seeded(10));
        let outbox = Arc::new(Outbox::default());

        let mut handles = Vec::new();
        for _ in 0..6 {
            let store = Arc::clone(&store);
            let outbox = Arc::clone(&outbox);
            handles.push(tokio::spawn(async move {
                ReconciliationService::new(store.as_ref(), outbox.as_ref())
                    .handle(paid("pi_race", 1))
                    .await
                    .unwrap()
            }));
        }
        let mut processed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ReconcileOutcome::Processed { .. }) {
                processed += 1;
            }
        }

        assert_eq!(processed, 1);
        assert_eq!(store.orders().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_unit_sold_twice_is_a_soft_inconsistency() {
        let store = seeded(1);
        let outbox = Outbox::default();
        let service = ReconciliationService::new(&store, &outbox);

        let first = service.handle(paid("pi_a", 1)).await.unwrap();
        let second = service.handle(paid("pi_b", 1)).await.unwrap();

        assert!(matches!(first, ReconcileOutcome::Processed { .. }));
        assert!(matches!(second, ReconcileOutcome::Processed { .. }));
        assert_eq!(store.orders().unwrap().len(), 2);
        assert_eq!(store.product(ProductId::new(1)).unwrap().unwrap().stock, Some(0));

        // Only the decrement that hit zero raised a stock notice.
        let stock_notices = store
            .notifications()
            .unwrap()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Stock)
            .count();
        assert_eq!(stock_notices, 1);
    }

    #[tokio::test]
    async fn store_failure_aborts_and_a_retry_succeeds() {
        let store = seeded(10);
        let outbox = Outbox::default();
        let service = ReconciliationService::new(&store, &outbox);

        store.set_fail_writes(true);
        assert!(service.handle(paid("pi_retry", 1)).await.is_err());
        assert!(store.orders().unwrap().is_empty());
        assert_eq!(store.product(ProductId::new(1)).unwrap().unwrap().stock, Some(10));
        assert!(outbox.0.lock().unwrap().is_empty());

        store.set_fail_writes(false);
        assert!(matches!(
            service.handle(paid("pi_retry", 1)).await.unwrap(),
            ReconcileOutcome::Processed { .. }
        ));
    }

    #[tokio::test]
    async fn bad_metadata_and_non_payment_events_are_ignored() {
        let store = seeded(10);
        let outbox = Outbox::default();
        let service = ReconciliationService::new(&store, &outbox);

        let mut event = paid("pi_x", 1);
        if let WebhookEvent::PaymentSucceeded { session, .. } = &mut event {
            session.metadata.remove("user_id");
        }
        assert!(matches!(
            service.handle(event).await.unwrap(),
            ReconcileOutcome::Ignored { .. }
        ));

        let pending = WebhookEvent::AwaitingPayment {
            event_id: "evt".into(),
            session_id: "cs".into(),
        };
        assert!(matches!(
            service.handle(pending).await.unwrap(),
            ReconcileOutcome::Ignored { .. }
        ));
        assert!(store.orders().unwrap().is_empty());
    }

    #[test]
    fn intent_total_matches_items_plus_fee() {
        let metadata = HashMap::from([
            ("user_id".to_string(), "7".to_string()),
            (
                "items".to_string(),
                r#"[{"product_id":1,"name":"A","price":"2.50","quantity":3},{"product_id":2,"name":"B","price":"1.25","quantity":2}]"#
                    .to_string(),
            ),
            ("shipping_fee".to_string(), "0.50".to_string()),
        ]);
        let intent = OrderIntent::from_metadata(&metadata).unwrap();

        assert_eq!(intent.items_total().to_string(), "10.00");
        assert_eq!(intent.total().to_string(), "10.50");
        assert_eq!(intent.shipping_address, "");
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn missing_shipping_address_is_logged() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let metadata = HashMap::from([
            ("user_id".to_string(), "7".to_string()),
            (
                "items".to_string(),
                r#"[{"product_id":1,"name":"A","price":"2.50","quantity":1}]"#.to_string(),
            ),
            ("shipping_address".to_string(), "  ".to_string()),
        ]);
        let intent = tracing::subscriber::with_default(subscriber, || {
            OrderIntent::from_metadata(&metadata)
        })
        .unwrap();

        assert_eq!(intent.shipping_address, "");
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("Paid session carries no shipping address"), "{output}");
    }

    #[tokio::test]
    async fn materialized_lines_are_normalized() {
        let store = seeded(10);
        let outbox = Outbox::default();
        ReconciliationService::new(&store, &outbox)
            .handle(paid("pi_lines", 2))
            .await
            .unwrap();

        let views = store.orders_for_user(UserId::new(7)).await.unwrap();
        assert!(matches!(&views[0].lines, OrderLines::Normalized(items) if items[0].quantity == 2));
    }
}
