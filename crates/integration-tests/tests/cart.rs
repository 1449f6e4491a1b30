//! Cart and wishlist over HTTP.

use axum::http::StatusCode;
use serde_json::json;
use zandmarket_integration_tests::TestContext;

#[tokio::test]
async fn adding_the_same_product_merges_quantities() {
    let ctx = TestContext::new();
    let buyer = ctx.seed_user(1, "Ada", "ada@zandmarket.test", false);
    ctx.seed_product(1, "Enamel mug", 1000, 10);
    let token = ctx.token_for(&buyer);

    let first = ctx
        .post("/api/cart", Some(&token), &json!({ "product_id": 1 }))
        .await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.text());

    let second = ctx
        .post(
            "/api/cart",
            Some(&token),
            &json!({ "product_id": 1, "quantity": 2 }),
        )
        .await;
    let cart = second.json();
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(cart["items"][0]["quantity"], 3);
    assert_eq!(cart["total_products"], 3);

    let item_id = cart["items"][0]["item_id"].as_i64().unwrap();
    let updated = ctx
        .put(
            &format!("/api/cart/items/{item_id}"),
            Some(&token),
            &json!({ "quantity": 5 }),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.json()["quantity"], 5);

    let zero = ctx
        .put(
            &format!("/api/cart/items/{item_id}"),
            Some(&token),
            &json!({ "quantity": 0 }),
        )
        .await;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);

    let oversized = ctx
        .put(
            &format!("/api/cart/items/{item_id}"),
            Some(&token),
            &json!({ "quantity": 3_000_000_000_u64 }),
        )
        .await;
    assert_eq!(oversized.status, StatusCode::BAD_REQUEST);

    let removed = ctx
        .delete(&format!("/api/cart/items/{item_id}"), Some(&token))
        .await;
    assert_eq!(removed.status, StatusCode::OK);
    assert_eq!(removed.json()["total_products"], 0);
}

#[tokio::test]
async fn carts_are_private_and_products_must_exist() {
    let ctx = TestContext::new();
    let ada = ctx.seed_user(1, "Ada", "ada@zandmarket.test", false);
    let bo = ctx.seed_user(2, "Bo", "bo@zandmarket.test", false);
    ctx.seed_product(1, "Enamel mug", 1000, 10);

    let missing = ctx
        .post(
            "/api/cart",
            Some(&ctx.token_for(&ada)),
            &json!({ "product_id": 99 }),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let cart = ctx
        .post(
            "/api/cart",
            Some(&ctx.token_for(&ada)),
            &json!({ "product_id": 1 }),
        )
        .await
        .json();
    let item_id = cart["items"][0]["item_id"].as_i64().unwrap();

    let foreign = ctx
        .delete(
            &format!("/api/cart/items/{item_id}"),
            Some(&ctx.token_for(&bo)),
        )
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    let anonymous = ctx.get("/api/cart", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wishlist_round_trip() {
    let ctx = TestContext::new();
    let buyer = ctx.seed_user(1, "Ada", "ada@zandmarket.test", false);
    ctx.seed_product(1, "Enamel mug", 1000, 10);
    ctx.seed_product(2, "Linen apron", 2500, 3);
    let token = ctx.token_for(&buyer);

    for product_id in [1, 2] {
        let added = ctx
            .post(
                "/api/wishlist",
                Some(&token),
                &json!({ "product_id": product_id }),
            )
            .await;
        assert_eq!(added.status, StatusCode::OK, "{}", added.text());
    }

    let listed = ctx.get("/api/wishlist", Some(&token)).await.json();
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let remaining = ctx.delete("/api/wishlist/1", Some(&token)).await.json();
    assert_eq!(remaining.as_array().unwrap().len(), 1);
    assert_eq!(remaining[0]["product_id"], 2);

    let cleared = ctx.delete("/api/wishlist/clear", Some(&token)).await;
    assert_eq!(cleared.status, StatusCode::OK);
    let empty = ctx.get("/api/wishlist", Some(&token)).await.json();
    assert_eq!(empty, json!([]));
}
