//! `PgStore` materialization against a real database.
//!
//! These need a disposable `PostgreSQL` database; the migrations are applied
//! on connect and every test seeds its own uniquely named rows.
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/zandmarket_test \
//!     cargo test -p zandmarket-integration-tests --test postgres -- --ignored
//! ```

use rust_decimal::Decimal;
use secrecy::SecretString;
use uuid::Uuid;
use zandmarket_api::db::{CatalogStore, OrderStore, PgStore, RepositoryError, create_pool};
use zandmarket_api::models::{LineItem, NewOrder, StockOutcome};
use zandmarket_core::{Money, ProductId, UserId};

struct Fixture {
    store: PgStore,
    tag: String,
    user_id: UserId,
    product_id: ProductId,
}

async fn fixture(stock: i32) -> Fixture {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a disposable PostgreSQL database");
    let pool = create_pool(&SecretString::from(url)).await.unwrap();
    sqlx::migrate!("../api/migrations").run(&pool).await.unwrap();

    let tag = Uuid::new_v4().simple().to_string();

    let (user_id,): (i32,) =
        sqlx::query_as("INSERT INTO users (name, email) VALUES ($1, $2) RETURNING id")
            .bind(format!("Buyer {tag}"))
            .bind(format!("buyer-{tag}@zandmarket.test"))
            .fetch_one(&pool)
            .await
            .unwrap();

    let (product_id,): (i32,) =
        sqlx::query_as("INSERT INTO products (name, price, stock) VALUES ($1, $2, $3) RETURNING id")
            .bind(format!("Enamel mug {tag}"))
            .bind(Decimal::new(1000, 2))
            .bind(stock)
            .fetch_one(&pool)
            .await
            .unwrap();

    Fixture {
        store: PgStore::new(pool),
        tag,
        user_id: UserId::new(user_id),
        product_id: ProductId::new(product_id),
    }
}

impl Fixture {
    fn intent(&self, name: &str) -> String {
        format!("{name}_{}", self.tag)
    }

    fn order(&self, payment_intent: &str, quantity: u32) -> NewOrder {
        let unit_price = Money::from_minor(1000);
        NewOrder {
            user_id: self.user_id,
            order_number: "ORD123".into(),
            items: vec![LineItem {
                product_id: self.product_id,
                name: "Enamel mug".into(),
                unit_price,
                quantity,
                image: None,
            }],
            shipping_address: "1 Dock Road, Bristol".into(),
            shipping_fee: Money::ZERO,
            total_amount: unit_price.times(quantity),
            payment_intent_id: payment_intent.to_string(),
            delivery_token: format!("token_{payment_intent}"),
        }
    }

    async fn stock(&self) -> Option<i32> {
        self.store
            .find_product(self.product_id)
            .await
            .unwrap()
            .and_then(|p| p.stock)
    }
}

#[tokio::test]
#[ignore = "Requires PostgreSQL at DATABASE_URL"]
async fn replayed_intent_writes_exactly_one_order() {
    let fx = fixture(10).await;
    let intent = fx.intent("pi_123");

    let done = fx.store.materialize(fx.order(&intent, 2)).await.unwrap();
    assert_eq!(done.order.stripe_payment_id.as_deref(), Some(intent.as_str()));
    assert_eq!(done.order.user_id, fx.user_id);
    assert_eq!(done.order.total_amount, Money::from_minor(2000));
    assert!(done.order.is_paid);
    assert_eq!(done.items.len(), 1);
    assert_eq!(done.items.first().unwrap().product_id, Some(fx.product_id));
    assert_eq!(
        done.stock.first().unwrap().outcome,
        StockOutcome::Decremented { remaining: 8 }
    );

    let replay = fx.store.materialize(fx.order(&intent, 2)).await;
    assert!(matches!(replay, Err(RepositoryError::Conflict(_))));

    let stored = fx
        .store
        .find_order_by_payment_intent(&intent)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, done.order.id);
    assert_eq!(fx.store.order_items(stored.id).await.unwrap().len(), 1);
    assert_eq!(fx.stock().await, Some(8));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL at DATABASE_URL"]
async fn concurrent_replays_of_one_intent_commit_once() {
    let fx = fixture(10).await;
    let intent = fx.intent("pi_race");

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = fx.store.clone();
        let order = fx.order(&intent, 1);
        handles.push(tokio::spawn(async move { store.materialize(order).await }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(RepositoryError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(fx.stock().await, Some(9));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL at DATABASE_URL"]
async fn two_buyers_paying_for_the_last_unit_never_drive_stock_negative() {
    let fx = fixture(1).await;

    let first = {
        let store = fx.store.clone();
        let order = fx.order(&fx.intent("pi_a"), 1);
        tokio::spawn(async move { store.materialize(order).await })
    };
    let second = {
        let store = fx.store.clone();
        let order = fx.order(&fx.intent("pi_b"), 1);
        tokio::spawn(async move { store.materialize(order).await })
    };

    let mut outcomes: Vec<StockOutcome> = Vec::new();
    for handle in [first, second] {
        let done = handle.await.unwrap().unwrap();
        outcomes.push(done.stock.first().unwrap().outcome);
    }
    outcomes.sort_by_key(|o| matches!(o, StockOutcome::Insufficient));

    assert_eq!(
        outcomes,
        [
            StockOutcome::Decremented { remaining: 0 },
            StockOutcome::Insufficient
        ]
    );
    assert_eq!(fx.stock().await, Some(0));
}
