//! Order administration, delivery confirmation and access control.

use axum::http::StatusCode;
use serde_json::json;
use zandmarket_api::models::{Order, User};
use zandmarket_integration_tests::{FRONTEND_URL, TestContext, line, paid_session};

/// A paid order for `buyer`, created through checkout and the webhook.
async fn paid_order(ctx: &TestContext, buyer: &User, payment_intent: &str) -> Order {
    let request = ctx
        .checkout(buyer, json!([line(1, "Enamel mug", "10.00", 1)]), 0)
        .await;
    let response = ctx
        .deliver(&paid_session(&format!("evt_{payment_intent}"), payment_intent, &request))
        .await;
    assert_eq!(response.json()["outcome"], "processed");

    ctx.store
        .orders()
        .unwrap()
        .into_iter()
        .find(|o| o.stripe_payment_id.as_deref() == Some(payment_intent))
        .unwrap()
}

fn setup() -> (TestContext, User, User) {
    let ctx = TestContext::new();
    let admin = ctx.seed_user(1, "Ops", "ops@zandmarket.test", true);
    let buyer = ctx.seed_user(2, "Ada", "ada@zandmarket.test", false);
    ctx.seed_product(1, "Enamel mug", 1000, 10);
    (ctx, admin, buyer)
}

#[tokio::test]
async fn shipping_mails_a_link_that_confirms_delivery_once() {
    let (ctx, admin, buyer) = setup();
    let order = paid_order(&ctx, &buyer, "pi_ship").await;

    let shipped = ctx
        .put(
            &format!("/api/orders/{}/status", order.id),
            Some(&ctx.token_for(&admin)),
            &json!({ "status": "shipped" }),
        )
        .await;
    assert_eq!(shipped.status, StatusCode::OK, "{}", shipped.text());
    assert_eq!(shipped.json()["status"], "shipped");

    let token = ctx
        .store
        .orders()
        .unwrap()
        .into_iter()
        .find(|o| o.id == order.id)
        .and_then(|o| o.delivery_token)
        .unwrap();

    let link = format!(
        "{FRONTEND_URL}/orders/{}/confirm-delivery?token={token}",
        order.id
    );
    let status_mail = ctx.mailer.sent().pop().unwrap();
    assert_eq!(status_mail.to.as_str(), "ada@zandmarket.test");
    assert!(status_mail.html.contains(&link) || status_mail.text.contains(&link));

    let uri = format!("/api/orders/{}/confirm-delivery", order.id);

    let forged = ctx.get(&format!("{uri}?token=deadbeef"), None).await;
    assert_eq!(forged.status, StatusCode::FORBIDDEN);

    let missing = ctx.get(&uri, None).await;
    assert_eq!(missing.status, StatusCode::FORBIDDEN);

    let confirmed = ctx.get(&format!("{uri}?token={token}"), None).await;
    assert_eq!(confirmed.status, StatusCode::OK);
    assert_eq!(
        confirmed.text(),
        "Thank you! Your order has been marked as delivered."
    );

    let again = ctx.get(&format!("{uri}?token={token}"), None).await;
    assert_eq!(again.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_status_is_a_bad_request() {
    let (ctx, admin, buyer) = setup();
    let order = paid_order(&ctx, &buyer, "pi_status").await;

    let response = ctx
        .put(
            &format!("/api/orders/{}/status", order.id),
            Some(&ctx.token_for(&admin)),
            &json!({ "status": "teleported" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let (ctx, admin, buyer) = setup();
    let stranger = ctx.seed_user(3, "Cy", "cy@zandmarket.test", false);
    let order = paid_order(&ctx, &buyer, "pi_own").await;
    let path = format!("/api/orders/{}", order.id);

    let own = ctx.get(&path, Some(&ctx.token_for(&buyer))).await;
    assert_eq!(own.status, StatusCode::OK);

    let theirs = ctx.get(&path, Some(&ctx.token_for(&stranger))).await;
    assert_eq!(theirs.status, StatusCode::NOT_FOUND);

    let as_admin = ctx.get(&path, Some(&ctx.token_for(&admin))).await;
    assert_eq!(as_admin.status, StatusCode::OK);

    let mine = ctx.get("/api/orders/mine", Some(&ctx.token_for(&stranger))).await;
    assert_eq!(mine.json(), json!([]));

    let listing = ctx.get("/api/orders", Some(&ctx.token_for(&buyer))).await;
    assert_eq!(listing.status, StatusCode::FORBIDDEN);

    let all = ctx.get("/api/orders", Some(&ctx.token_for(&admin))).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.json()[0]["customer_email"], "ada@zandmarket.test");
}

#[tokio::test]
async fn mark_received_is_for_the_owner_and_idempotent() {
    let (ctx, _admin, buyer) = setup();
    let stranger = ctx.seed_user(3, "Cy", "cy@zandmarket.test", false);
    let order = paid_order(&ctx, &buyer, "pi_recv").await;
    let path = format!("/api/orders/{}/mark-received", order.id);

    let denied = ctx
        .put(&path, Some(&ctx.token_for(&stranger)), &json!({}))
        .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    for _ in 0..2 {
        let response = ctx.put(&path, Some(&ctx.token_for(&buyer)), &json!({})).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json()["is_delivered"], true);
    }
}

#[tokio::test]
async fn admins_can_delete_orders() {
    let (ctx, admin, buyer) = setup();
    let order = paid_order(&ctx, &buyer, "pi_delete").await;
    let path = format!("/api/orders/{}", order.id);

    let denied = ctx.delete(&path, Some(&ctx.token_for(&buyer))).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let deleted = ctx.delete(&path, Some(&ctx.token_for(&admin))).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json()["message"], "Order deleted successfully");
    assert!(ctx.store.orders().unwrap().is_empty());

    let gone = ctx.delete(&path, Some(&ctx.token_for(&admin))).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notification_feed_is_split_by_audience() {
    let (ctx, admin, buyer) = setup();
    paid_order(&ctx, &buyer, "pi_feed").await;

    let customer_feed = ctx
        .get("/api/notifications", Some(&ctx.token_for(&buyer)))
        .await;
    let customer_feed = customer_feed.json();
    let customer_kinds: Vec<&str> = customer_feed
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["kind"].as_str())
        .collect();
    assert_eq!(customer_kinds, ["order_confirmed"]);

    let admin_token = ctx.token_for(&admin);
    let admin_feed = ctx.get("/api/notifications", Some(&admin_token)).await.json();
    assert!(
        admin_feed
            .as_array()
            .unwrap()
            .iter()
            .any(|n| n["kind"] == "order")
    );

    let marked = ctx
        .put("/api/notifications/mark-all", Some(&admin_token), &json!({}))
        .await;
    assert_eq!(marked.status, StatusCode::OK);

    let forbidden = ctx
        .put(
            "/api/notifications/mark-all",
            Some(&ctx.token_for(&buyer)),
            &json!({}),
        )
        .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
}
