//! Cart and wishlist routes. All require a signed-in user.

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use zandmarket_core::{CartItemId, ProductId};

use super::ApiJson;
use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::{CartLine, CartView, WishlistLine};
use crate::services::cart::{AddToCart, AddToWishlist, CartService, UpdateQuantity};
use crate::state::AppState;

/// GET /api/cart
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CartView>> {
    Ok(Json(CartService::new(state.store()).get(&user).await?))
}

/// POST /api/cart
///
/// # Errors
///
/// 404 for an unknown product, 400 for a zero quantity.
pub async fn add(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<AddToCart>,
) -> Result<Json<CartView>> {
    Ok(Json(CartService::new(state.store()).add(&user, request).await?))
}

/// PUT /api/cart/items/{item_id}
///
/// # Errors
///
/// 404 when the line is not in the caller's cart.
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(item_id): Path<CartItemId>,
    ApiJson(request): ApiJson<UpdateQuantity>,
) -> Result<Json<CartLine>> {
    Ok(Json(
        CartService::new(state.store())
            .set_quantity(&user, item_id, request)
            .await?,
    ))
}

/// DELETE /api/cart/items/{item_id}
///
/// # Errors
///
/// 404 when the line is not in the caller's cart.
pub async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(item_id): Path<CartItemId>,
) -> Result<Json<CartView>> {
    Ok(Json(
        CartService::new(state.store()).remove(&user, item_id).await?,
    ))
}

/// DELETE /api/cart
///
/// # Errors
///
/// 404 when the caller never had a cart.
pub async fn clear(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>> {
    CartService::new(state.store()).clear(&user).await?;
    Ok(Json(json!({ "message": "Cart cleared" })))
}

/// GET /api/wishlist
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn wishlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<WishlistLine>>> {
    Ok(Json(CartService::new(state.store()).wishlist(&user).await?))
}

/// POST /api/wishlist
///
/// # Errors
///
/// 404 for an unknown product.
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<AddToWishlist>,
) -> Result<Json<Value>> {
    let line = CartService::new(state.store())
        .add_to_wishlist(&user, request)
        .await?;
    Ok(Json(
        json!({ "message": "Product added to wishlist", "product": line }),
    ))
}

/// DELETE /api/wishlist/{product_id}
///
/// # Errors
///
/// 404 when the caller never had a wishlist.
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<ProductId>,
) -> Result<Json<Vec<WishlistLine>>> {
    Ok(Json(
        CartService::new(state.store())
            .remove_from_wishlist(&user, product_id)
            .await?,
    ))
}

/// DELETE /api/wishlist/clear
///
/// # Errors
///
/// 404 when the caller never had a wishlist.
pub async fn clear_wishlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>> {
    CartService::new(state.store()).clear_wishlist(&user).await?;
    Ok(Json(json!({ "message": "Wishlist cleared" })))
}
