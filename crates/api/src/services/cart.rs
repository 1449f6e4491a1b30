//! Per-user cart and wishlist.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};
use zandmarket_core::{CartItemId, ProductId};

use crate::db::{RepositoryError, Store};
use crate::models::{CartLine, CartView, MAX_LINE_QUANTITY, Product, User, WishlistLine};

#[derive(Debug, Error)]
pub enum CartError {
    #[error("product not found")]
    ProductNotFound,

    #[error("quantity must be between 1 and {}", MAX_LINE_QUANTITY)]
    InvalidQuantity,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

const fn one() -> u32 {
    1
}

const fn check_quantity(quantity: u32) -> Result<(), CartError> {
    if quantity == 0 || quantity > MAX_LINE_QUANTITY {
        Err(CartError::InvalidQuantity)
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddToCart {
    pub product_id: ProductId,
    #[serde(default = "one")]
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateQuantity {
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddToWishlist {
    pub product_id: ProductId,
    #[serde(default = "one")]
    pub quantity: u32,
}

pub struct CartService<'a> {
    store: &'a dyn Store,
}

impl<'a> CartService<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn get(&self, user: &User) -> Result<CartView, CartError> {
        Ok(CartView::from_lines(self.store.cart_lines(user.id).await?))
    }

    /// Add a product, merging with an existing line.
    ///
    /// # Errors
    ///
    /// [`CartError::ProductNotFound`] or [`CartError::InvalidQuantity`].
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn add(&self, user: &User, request: AddToCart) -> Result<CartView, CartError> {
        let product = self.product(request.product_id, request.quantity).await?;
        self.store
            .add_to_cart(user.id, &product, request.quantity)
            .await?;
        debug!(product_id = %product.id, quantity = request.quantity, "Added to cart");
        self.get(user).await
    }

    /// # Errors
    ///
    /// [`CartError::NotFound`] when the item is not in this user's cart.
    pub async fn set_quantity(
        &self,
        user: &User,
        item_id: CartItemId,
        request: UpdateQuantity,
    ) -> Result<CartLine, CartError> {
        check_quantity(request.quantity)?;
        self.store
            .set_cart_quantity(user.id, item_id, request.quantity)
            .await?
            .ok_or(CartError::NotFound("cart item"))
    }

    /// # Errors
    ///
    /// [`CartError::NotFound`] when the item is not in this user's cart.
    pub async fn remove(&self, user: &User, item_id: CartItemId) -> Result<CartView, CartError> {
        if !self.store.remove_cart_item(user.id, item_id).await? {
            return Err(CartError::NotFound("cart item"));
        }
        self.get(user).await
    }

    /// # Errors
    ///
    /// [`CartError::NotFound`] when the user never had a cart.
    pub async fn clear(&self, user: &User) -> Result<(), CartError> {
        if self.store.clear_cart(user.id).await? {
            Ok(())
        } else {
            Err(CartError::NotFound("cart"))
        }
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn wishlist(&self, user: &User) -> Result<Vec<WishlistLine>, CartError> {
        Ok(self.store.wishlist(user.id).await?)
    }

    /// # Errors
    ///
    /// [`CartError::ProductNotFound`] or [`CartError::InvalidQuantity`].
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn add_to_wishlist(
        &self,
        user: &User,
        request: AddToWishlist,
    ) -> Result<WishlistLine, CartError> {
        let product = self.product(request.product_id, request.quantity).await?;
        Ok(self
            .store
            .add_to_wishlist(user.id, &product, request.quantity)
            .await?)
    }

    /// # Errors
    ///
    /// [`CartError::NotFound`] when the user never had a wishlist.
    pub async fn remove_from_wishlist(
        &self,
        user: &User,
        product_id: ProductId,
    ) -> Result<Vec<WishlistLine>, CartError> {
        if !self.store.remove_from_wishlist(user.id, product_id).await? {
            return Err(CartError::NotFound("wishlist"));
        }
        self.wishlist(user).await
    }

    /// # Errors
    ///
    /// [`CartError::NotFound`] when the user never had a wishlist.
    pub async fn clear_wishlist(&self, user: &User) -> Result<(), CartError> {
        if self.store.clear_wishlist(user.id).await? {
            Ok(())
        } else {
            Err(CartError::NotFound("wishlist"))
        }
    }

    async fn product(&self, id: ProductId, quantity: u32) -> Result<Product, CartError> {
        check_quantity(quantity)?;
        self.store
            .find_product(id)
            .await?
            .ok_or(CartError::ProductNotFound)
    }
}
