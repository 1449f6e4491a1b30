//! Stripe Checkout adapter.
//!
//! Talks to the REST API directly with `reqwest`: form-encoded bodies,
//! the secret key as the basic-auth user.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;
use zandmarket_core::Money;

use super::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentGateway, WebhookEvent,
    signature,
};
use crate::config::StripeConfig;

/// Stripe rejects metadata values longer than this.
const METADATA_VALUE_LIMIT: usize = 500;

const SHIPPING_LINE_NAME: &str = "Shipping Fee";

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Stripe client for hosted checkout and webhook verification.
#[derive(Clone)]
pub struct StripeGateway {
    inner: Arc<StripeGatewayInner>,
}

struct StripeGatewayInner {
    client: reqwest::Client,
    secret_key: SecretString,
    webhook_secret: SecretString,
    currency: String,
    sessions_url: Url,
    success_url: String,
    cancel_url: String,
}

impl StripeGateway {
    /// Build a gateway. `frontend_url` must not end with a slash.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the API base
    /// URL cannot be joined.
    pub fn new(config: &StripeConfig, frontend_url: &str) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zandmarket-api/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let sessions_url = config
            .api_base
            .join("v1/checkout/sessions")
            .map_err(|e| PaymentError::Validation(format!("bad Stripe API base: {e}")))?;

        Ok(Self {
            inner: Arc::new(StripeGatewayInner {
                client,
                secret_key: config.secret_key.clone(),
                webhook_secret: config.webhook_secret.clone(),
                currency: config.currency.clone(),
                sessions_url,
                success_url: format!("{frontend_url}/settings?tab=My+Orders"),
                cancel_url: format!("{frontend_url}/cart"),
            }),
        })
    }

    /// The form body for a checkout session, in Stripe's bracket notation.
    fn checkout_form(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<Vec<(String, String)>, PaymentError> {
        let inner = &self.inner;
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("payment_method_types[1]".into(), "bacs_debit".into()),
            ("customer_email".into(), request.customer_email.to_string()),
            ("success_url".into(), inner.success_url.clone()),
            ("cancel_url".into(), inner.cancel_url.clone()),
        ];

        let mut push_line = |index: usize, name: &str, image: Option<&str>, amount: Money, quantity: u32| {
            let unit_amount = amount
                .to_minor_units()
                .map_err(|e| PaymentError::Validation(e.to_string()))?;
            let prefix = format!("line_items[{index}]");
            form.push((format!("{prefix}[price_data][currency]"), inner.currency.clone()));
            form.push((format!("{prefix}[price_data][product_data][name]"), name.to_string()));
            if let Some(image) = image {
                form.push((
                    format!("{prefix}[price_data][product_data][images][0]"),
                    image.to_string(),
                ));
            }
            form.push((format!("{prefix}[price_data][unit_amount]"), unit_amount.to_string()));
            form.push((format!("{prefix}[quantity]"), quantity.to_string()));
            Ok::<_, PaymentError>(())
        };

        for (index, item) in request.items.iter().enumerate() {
            push_line(index, &item.name, item.image.as_deref(), item.unit_price, item.quantity)?;
        }
        if request.shipping_fee > Money::ZERO {
            push_line(request.items.len(), SHIPPING_LINE_NAME, None, request.shipping_fee, 1)?;
        }

        let items_json = serde_json::to_string(&request.items)
            .map_err(|e| PaymentError::Validation(e.to_string()))?;
        let metadata = [
            ("user_id", request.user_id.to_string()),
            ("shipping_address", request.shipping_address.clone()),
            ("items", items_json),
            ("shipping_fee", request.shipping_fee.to_string()),
        ];
        for (key, value) in metadata {
            if value.chars().count() > METADATA_VALUE_LIMIT {
                return Err(PaymentError::Validation(format!(
                    "metadata field {key} exceeds {METADATA_VALUE_LIMIT} characters"
                )));
            }
            form.push((format!("metadata[{key}]"), value));
        }

        Ok(form)
    }
}

/// Keyed on the attempt, not the cart: a resent attempt replays the first
/// session, while a later purchase of the same cart opens a new one.
fn idempotency_key(attempt_id: Uuid) -> String {
    format!("checkout-{attempt_id}")
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(
        skip(self, request),
        fields(attempt_id = %request.attempt_id, user_id = %request.user_id, lines = request.items.len())
    )]
    async fn create_checkout(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let form = self.checkout_form(request)?;

        let response = self
            .inner
            .client
            .post(self.inner.sessions_url.clone())
            .basic_auth(self.inner.secret_key.expose_secret(), None::<&str>)
            .header("Idempotency-Key", idempotency_key(request.attempt_id))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<StripeErrorBody>(&body) {
                Ok(parsed) => format!(
                    "{}: {}",
                    parsed.error.kind.unwrap_or_else(|| "error".to_string()),
                    parsed.error.message.unwrap_or_default()
                ),
                Err(_) => body,
            };
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: CheckoutSession = response.json().await?;
        debug!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, PaymentError> {
        let header = signature_header.ok_or_else(|| {
            PaymentError::InvalidSignature("missing Stripe-Signature header".to_string())
        })?;
        signature::verify(
            payload,
            header,
            self.inner.webhook_secret.expose_secret(),
            chrono::Utc::now().timestamp(),
        )?;
        WebhookEvent::parse(payload)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use zandmarket_core::{Email, ProductId, UserId};

    use super::*;
    use crate::models::LineItem;

    fn gateway() -> StripeGateway {
        let config = StripeConfig {
            secret_key: SecretString::from("sk_test_x".to_string()),
            webhook_secret: SecretString::from("whsec_test".to_string()),
            currency: "gbp".into(),
            api_base: Url::parse("https://api.stripe.com").unwrap(),
        };
        StripeGateway::new(&config, "https://shop.example").unwrap()
    }

    fn request(name: &str, shipping_fee: Money) -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            attempt_id: Uuid::new_v4(),
            user_id: UserId::new(7),
            customer_email: Email::parse("buyer@example.com").unwrap(),
            items: vec![LineItem {
                product_id: ProductId::new(1),
                name: name.into(),
                unit_price: Money::from_minor(1_000),
                quantity: 2,
                image: Some("https://img.example/1.png".into()),
            }],
            shipping_address: "1 High St".into(),
            shipping_fee,
        }
    }

    fn value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn form_carries_lines_shipping_and_metadata() {
        let form = gateway()
            .checkout_form(&request("Tea", Money::from_minor(100)))
            .unwrap();

        assert_eq!(value(&form, "line_items[0][price_data][unit_amount]"), Some("1000"));
        assert_eq!(value(&form, "line_items[0][quantity]"), Some("2"));
        assert_eq!(
            value(&form, "line_items[1][price_data][product_data][name]"),
            Some(SHIPPING_LINE_NAME)
        );
        assert_eq!(value(&form, "line_items[1][price_data][unit_amount]"), Some("100"));
        assert_eq!(value(&form, "metadata[user_id]"), Some("7"));
        assert_eq!(value(&form, "metadata[shipping_fee]"), Some("1.00"));
        assert_eq!(
            value(&form, "success_url"),
            Some("https://shop.example/settings?tab=My+Orders")
        );
        assert_eq!(value(&form, "payment_method_types[1]"), Some("bacs_debit"));

        let items: Vec<LineItem> =
            serde_json::from_str(value(&form, "metadata[items]").unwrap()).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn no_shipping_line_when_fee_is_zero() {
        let form = gateway().checkout_form(&request("Tea", Money::ZERO)).unwrap();
        assert!(value(&form, "line_items[1][quantity]").is_none());
        assert_eq!(value(&form, "metadata[shipping_fee]"), Some("0.00"));
    }

    #[test]
    fn oversized_metadata_is_rejected_before_sending() {
        let long_name = "x".repeat(METADATA_VALUE_LIMIT);
        assert!(matches!(
            gateway().checkout_form(&request(&long_name, Money::ZERO)),
            Err(PaymentError::Validation(_))
        ));
    }

    #[test]
    fn identical_carts_bought_twice_get_distinct_keys() {
        let first = request("Tea", Money::ZERO);
        let second = request("Tea", Money::ZERO);
        assert_ne!(
            idempotency_key(first.attempt_id),
            idempotency_key(second.attempt_id)
        );

        let resent = first.clone();
        assert_eq!(
            idempotency_key(first.attempt_id),
            idempotency_key(resent.attempt_id)
        );
    }

    #[test]
    fn webhook_without_header_fails_closed() {
        assert!(matches!(
            gateway().verify_webhook(b"{}", None),
            Err(PaymentError::InvalidSignature(_))
        ));
    }

    #[test]
    fn webhook_with_valid_signature_parses() {
        let payload = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
        let header = signature::sign(payload, "whsec_test", chrono::Utc::now().timestamp()).unwrap();
        assert!(matches!(
            gateway().verify_webhook(payload, Some(&header)).unwrap(),
            WebhookEvent::Ignored { .. }
        ));
    }
}
