//! The slice of the product catalogue this service reads and mutates.

use rust_decimal::Decimal;
use serde::Serialize;
use zandmarket_core::{Money, ProductId};

/// A catalogue product. Created and edited elsewhere; only stock changes here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub discount_percentage: Decimal,
    /// Ignored when `unlimited_stock` is set.
    pub stock: Option<i32>,
    pub unlimited_stock: bool,
}

impl Product {
    /// Catalogue price after the product's discount.
    #[must_use]
    pub fn discounted_price(&self) -> Money {
        self.price.discounted(self.discount_percentage)
    }

    /// Units on hand, `None` for unlimited products.
    #[must_use]
    pub fn tracked_stock(&self) -> Option<i64> {
        if self.unlimited_stock {
            None
        } else {
            Some(i64::from(self.stock.unwrap_or(0)))
        }
    }

    /// Whether `quantity` units can currently be sold.
    #[must_use]
    pub fn can_supply(&self, quantity: u32) -> bool {
        self.tracked_stock()
            .is_none_or(|on_hand| on_hand >= i64::from(quantity))
    }
}

/// What a conditional stock decrement did to one product row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StockOutcome {
    /// Stock reduced; `remaining` units left.
    Decremented { remaining: i32 },
    /// Product has unlimited stock and was left untouched.
    Unlimited,
    /// Not enough stock at write time; nothing changed.
    Insufficient,
    /// No such product row.
    Missing,
}

/// The decrement applied for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub outcome: StockOutcome,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(stock: Option<i32>, unlimited: bool) -> Product {
        Product {
            id: ProductId::new(1),
            name: "Saffron".into(),
            price: Money::new("40.00".parse().unwrap()),
            discount_percentage: Decimal::from(25),
            stock,
            unlimited_stock: unlimited,
        }
    }

    #[test]
    fn supply_respects_tracked_stock() {
        assert!(product(Some(2), false).can_supply(2));
        assert!(!product(Some(2), false).can_supply(3));
        assert!(!product(None, false).can_supply(1));
        assert!(product(Some(0), true).can_supply(1_000));
    }

    #[test]
    fn discounted_price() {
        assert_eq!(product(None, true).discounted_price().to_string(), "30.00");
    }
}
