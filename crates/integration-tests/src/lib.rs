//! End-to-end harness for the ZandMarket API.
//!
//! Every test drives the real router in process through
//! [`tower::ServiceExt::oneshot`]. Collaborators that would leave the
//! process are replaced:
//!
//! - [`MemoryStore`] stands in for `PostgreSQL`
//! - [`FakeGateway`] records checkout sessions and verifies webhook
//!   signatures with [`WEBHOOK_SECRET`], exactly as Stripe signs them
//! - [`RecordingMailer`] keeps every outgoing e-mail
//!
//! No database, network or environment variables are needed:
//!
//! ```bash
//! cargo test -p zandmarket-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use zandmarket_api::config::{ApiConfig, PricePolicy, StripeConfig};
use zandmarket_api::db::MemoryStore;
use zandmarket_api::models::{Product, User};
use zandmarket_api::payments::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentGateway, WebhookEvent,
    signature,
};
use zandmarket_api::routes::webhooks::SIGNATURE_HEADER;
use zandmarket_api::services::email::{EmailError, Mailer, OutgoingEmail};
use zandmarket_api::state::AppState;
use zandmarket_core::{Email, Money, ProductId, UserId};

pub const WEBHOOK_SECRET: &str = "whsec_integration_suite";
pub const JWT_SECRET: &str = "integration-suite-signing-key-9f3b7c1e5a2d";
pub const FRONTEND_URL: &str = "https://shop.test";

/// Payment gateway that never leaves the process.
#[derive(Debug, Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<CheckoutSessionRequest>>,
}

impl FakeGateway {
    /// Every checkout session opened so far, oldest first.
    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The most recent checkout session request.
    pub fn last_request(&self) -> CheckoutSessionRequest {
        self.requests()
            .pop()
            .expect("no checkout session was opened")
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let id = format!("cs_test_{}", requests.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, PaymentError> {
        let header = signature_header
            .ok_or_else(|| PaymentError::InvalidSignature("missing signature header".into()))?;
        signature::verify(payload, header, WEBHOOK_SECRET, Utc::now().timestamp())?;
        WebhookEvent::parse(payload)
    }
}

/// Mailer that keeps what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!("response is not JSON ({e}): {}", self.text())
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn test_config() -> ApiConfig {
    ApiConfig {
        database_url: SecretString::from("postgres://unused@localhost/unused"),
        host: [127, 0, 0, 1].into(),
        port: 0,
        frontend_url: FRONTEND_URL.to_string(),
        jwt_secret: SecretString::from(JWT_SECRET),
        stripe: StripeConfig {
            secret_key: SecretString::from("sk_test_unused"),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            currency: "gbp".to_string(),
            api_base: Url::parse("https://stripe.invalid").unwrap(),
        },
        price_policy: PricePolicy::ClientDeclared,
        smtp: None,
        cors_origins: vec![FRONTEND_URL.to_string()],
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// One application instance with fresh state.
#[derive(Clone)]
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub mailer: Arc<RecordingMailer>,
    router: Router,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_price_policy(PricePolicy::ClientDeclared)
    }

    pub fn with_price_policy(price_policy: PricePolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let mailer = Arc::new(RecordingMailer::default());

        let mut config = test_config();
        config.price_policy = price_policy;

        let state = AppState::new(config, store.clone(), gateway.clone(), mailer.clone());
        Self {
            store,
            gateway,
            mailer,
            router: zandmarket_api::app(state, None),
        }
    }

    pub fn seed_user(&self, id: i32, name: &str, email: &str, is_admin: bool) -> User {
        let user = User {
            id: UserId::new(id),
            name: name.to_string(),
            email: Email::parse(email).unwrap(),
            is_admin,
        };
        self.store.insert_user(user.clone()).unwrap();
        user
    }

    /// A tracked-stock product priced in pence, undiscounted.
    pub fn seed_product(&self, id: i32, name: &str, price_pence: i64, stock: i32) -> Product {
        let product = Product {
            id: ProductId::new(id),
            name: name.to_string(),
            price: Money::from_minor(price_pence),
            discount_percentage: Decimal::ZERO,
            stock: Some(stock),
            unlimited_stock: false,
        };
        self.store.insert_product(product.clone()).unwrap();
        product
    }

    pub fn stock_of(&self, id: i32) -> Option<i32> {
        self.store
            .product(ProductId::new(id))
            .unwrap()
            .and_then(|p| p.stock)
    }

    /// A bearer token the auth service would have issued for `user`.
    pub fn token_for(&self, user: &User) -> String {
        let claims = json!({
            "id": user.id.as_i32(),
            "exp": Utc::now().timestamp() + 3600,
        });
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {});
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<&Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.send(request.unwrap()).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.call("GET", uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: &Value) -> TestResponse {
        self.call("POST", uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: &Value) -> TestResponse {
        self.call("PUT", uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.call("DELETE", uri, token, None).await
    }

    /// Deliver `event` to the webhook endpoint, signed now.
    pub async fn deliver(&self, event: &Value) -> TestResponse {
        let payload = event.to_string();
        let header =
            signature::sign(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
        self.deliver_raw(payload, Some(&header)).await
    }

    pub async fn deliver_raw(&self, payload: String, signature_header: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/stripe")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(value) = signature_header {
            builder = builder.header(SIGNATURE_HEADER, value);
        }
        self.send(builder.body(Body::from(payload)).unwrap()).await
    }

    /// Check out `items` for `user` and return the session request the
    /// gateway received.
    pub async fn checkout(&self, user: &User, items: Value, shipping_fee_percent: u32) -> CheckoutSessionRequest {
        let response = self
            .post(
                "/api/orders",
                Some(&self.token_for(user)),
                &json!({
                    "items": items,
                    "shipping_address": "1 Dock Road, Bristol",
                    "shipping_fee_percent": shipping_fee_percent,
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text());
        self.gateway.last_request()
    }
}

/// The metadata Stripe echoes back for a session opened from `request`.
pub fn session_metadata(request: &CheckoutSessionRequest) -> Value {
    json!({
        "user_id": request.user_id.to_string(),
        "shipping_address": request.shipping_address,
        "items": serde_json::to_string(&request.items).unwrap(),
        "shipping_fee": request.shipping_fee.to_string(),
    })
}

/// A Stripe event wrapping a checkout session object.
pub fn checkout_event(
    event_type: &str,
    event_id: &str,
    payment_intent: &str,
    payment_status: &str,
    request: &CheckoutSessionRequest,
) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": format!("cs_for_{payment_intent}"),
                "payment_intent": payment_intent,
                "payment_status": payment_status,
                "metadata": session_metadata(request),
            }
        }
    })
}

/// `checkout.session.completed` with the money collected.
pub fn paid_session(event_id: &str, payment_intent: &str, request: &CheckoutSessionRequest) -> Value {
    checkout_event(
        "checkout.session.completed",
        event_id,
        payment_intent,
        "paid",
        request,
    )
}

/// One cart line as the storefront posts it.
pub fn line(product_id: i32, name: &str, price: &str, quantity: u32) -> Value {
    json!({
        "product_id": product_id,
        "name": name,
        "price": price,
        "quantity": quantity,
    })
}
