//! Cart and wishlist read models.

use rust_decimal::Decimal;
use serde::Serialize;
use zandmarket_core::{CartItemId, Money, ProductId};

/// A cart line with the price snapshot taken when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CartLine {
    pub item_id: CartItemId,
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i32,
    pub price: Money,
    pub discount_percentage: Decimal,
    pub stock: Option<i32>,
    pub unlimited_stock: bool,
}

impl CartLine {
    #[must_use]
    pub fn discounted_price(&self) -> Money {
        self.price.discounted(self.discount_percentage)
    }
}

/// The caller's cart as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    /// Sum of quantities across lines.
    pub total_products: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    #[serde(flatten)]
    pub line: CartLine,
    pub discounted_price: Money,
}

impl CartView {
    #[must_use]
    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        let total_products = lines.iter().map(|l| i64::from(l.quantity)).sum();
        let items = lines
            .into_iter()
            .map(|line| CartLineView {
                discounted_price: line.discounted_price(),
                line,
            })
            .collect();
        Self {
            items,
            total_products,
        }
    }
}

/// A wishlist entry joined with the live product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct WishlistLine {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    pub discount_percentage: Decimal,
    pub stock: Option<i32>,
    pub quantity: i32,
}
