//! Orders, their line items and the read-side views built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zandmarket_core::{Money, OrderId, OrderItemId, OrderStatus, ProductId, UserId};

use super::product::StockAdjustment;

/// Payment method tag stored on every order paid through Stripe.
pub const PAYMENT_METHOD_STRIPE: &str = "stripe";

/// Largest quantity one line may carry. Quantities are stored as `INTEGER`.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX.unsigned_abs();

/// One cart line as the customer declared it at checkout.
///
/// This is also the shape embedded in the checkout session metadata and
/// stored as the order's cart snapshot, so it must stay stable: historical
/// snapshots use `price` for the unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineItem {
    pub product_id: ProductId,
    pub name: String,
    #[serde(rename = "price", alias = "unit_price")]
    pub unit_price: Money,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl LineItem {
    /// `unit_price × quantity`, unrounded.
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// A persisted order row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: OrderId,
    /// Display code, not unique.
    pub order_number: String,
    pub user_id: UserId,
    pub payment_method: String,
    pub total_amount: Money,
    pub shipping_fee: Money,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_shipped: bool,
    pub shipped_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub shipping_address: Option<String>,
    pub cart_items: Option<serde_json::Value>,
    pub stripe_payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub delivery_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A purchased line, decoupled from the live product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    /// `None` once the product has been deleted from the catalogue.
    pub product_id: Option<ProductId>,
    pub name: String,
    pub price: Money,
    pub quantity: i32,
    pub image: Option<String>,
}

/// The lines of an order as shown to people.
///
/// Orders created before line items were normalized only carry the raw
/// cart snapshot; they are surfaced as-is instead of being reinterpreted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", content = "items", rename_all = "snake_case")]
pub enum OrderLines {
    Normalized(Vec<OrderItem>),
    LegacySnapshot(serde_json::Value),
}

impl OrderLines {
    /// Pick normalized rows when present, the stored snapshot otherwise.
    #[must_use]
    pub fn resolve(items: Vec<OrderItem>, snapshot: Option<&serde_json::Value>) -> Self {
        if items.is_empty() {
            Self::LegacySnapshot(
                snapshot
                    .cloned()
                    .unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
            )
        } else {
            Self::Normalized(items)
        }
    }
}

/// An order with its lines and, for admin listings, the customer.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub lines: OrderLines,
}

/// Everything needed to write a paid order in one transaction.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub order_number: String,
    pub items: Vec<LineItem>,
    pub shipping_address: String,
    pub shipping_fee: Money,
    pub total_amount: Money,
    pub payment_intent_id: String,
    pub delivery_token: String,
}

/// Result of a committed materialization.
#[derive(Debug, Clone)]
pub struct MaterializedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub stock: Vec<StockAdjustment>,
}

/// Admin status change, computed by the order service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub mark_shipped: bool,
    pub mark_delivered: bool,
}

impl StatusChange {
    /// Flags implied by moving to `status`. Flags are only ever raised.
    #[must_use]
    pub const fn to(status: OrderStatus) -> Self {
        Self {
            status,
            mark_shipped: matches!(status, OrderStatus::Shipped | OrderStatus::Delivered),
            mark_delivered: matches!(status, OrderStatus::Delivered),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn line_item_reads_legacy_and_current_price_keys() {
        let legacy: LineItem =
            serde_json::from_value(json!({"product_id": 1, "name": "Tea", "price": "10.00", "quantity": 2}))
                .unwrap();
        let current: LineItem = serde_json::from_value(
            json!({"product_id": 1, "name": "Tea", "unit_price": "10.00", "quantity": 2}),
        )
        .unwrap();
        assert_eq!(legacy, current);
        assert_eq!(legacy.line_total().to_string(), "20.00");

        let out = serde_json::to_value(&legacy).unwrap();
        assert_eq!(out["price"], json!("10.00"));
        assert!(out.get("image").is_none());
    }

    #[test]
    fn line_item_rejects_unknown_fields_and_negative_quantity() {
        assert!(serde_json::from_value::<LineItem>(
            json!({"product_id": 1, "name": "Tea", "price": "1", "quantity": 1, "discount": 50})
        )
        .is_err());
        assert!(serde_json::from_value::<LineItem>(
            json!({"product_id": 1, "name": "Tea", "price": "1", "quantity": -1})
        )
        .is_err());
    }

    #[test]
    fn lines_fall_back_to_snapshot_only_without_rows() {
        let snapshot = json!([{"product_id": 3, "quantity": 1}]);
        match OrderLines::resolve(Vec::new(), Some(&snapshot)) {
            OrderLines::LegacySnapshot(value) => assert_eq!(value, snapshot),
            OrderLines::Normalized(_) => panic!("expected snapshot"),
        }
        assert!(matches!(
            OrderLines::resolve(Vec::new(), None),
            OrderLines::LegacySnapshot(serde_json::Value::Array(ref v)) if v.is_empty()
        ));

        let item = OrderItem {
            id: OrderItemId::new(1),
            order_id: OrderId::new(1),
            product_id: Some(ProductId::new(3)),
            name: "Tea".into(),
            price: Money::from_minor(500),
            quantity: 1,
            image: None,
        };
        assert!(matches!(
            OrderLines::resolve(vec![item], Some(&snapshot)),
            OrderLines::Normalized(ref items) if items.len() == 1
        ));
    }

    #[test]
    fn status_change_only_raises_flags() {
        assert_eq!(
            StatusChange::to(OrderStatus::Cancelled),
            StatusChange {
                status: OrderStatus::Cancelled,
                mark_shipped: false,
                mark_delivered: false
            }
        );
        let delivered = StatusChange::to(OrderStatus::Delivered);
        assert!(delivered.mark_shipped && delivered.mark_delivered);
    }
}
