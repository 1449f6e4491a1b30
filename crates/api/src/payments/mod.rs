//! Payment processor boundary.
//!
//! The rest of the crate only sees [`PaymentGateway`]: create a hosted
//! checkout session, and turn a signed webhook delivery into a
//! [`WebhookEvent`]. [`StripeGateway`] is the production implementation.

pub mod signature;
pub mod stripe;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;
use zandmarket_core::{Email, Money, UserId};

use crate::models::LineItem;

pub use stripe::StripeGateway;

/// Errors from the payment processor boundary.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Signature header missing, malformed, stale or not matching.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Signed payload that is not a well-formed event.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// Request rejected before any network call.
    #[error("invalid checkout request: {0}")]
    Validation(String),

    /// Transport failure talking to the processor.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The processor answered with an error.
    #[error("payment processor error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// What the hosted checkout page should charge for.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    /// One per checkout attempt. Resending the same attempt reuses it.
    pub attempt_id: Uuid,
    pub user_id: UserId,
    pub customer_email: Email,
    pub items: Vec<LineItem>,
    pub shipping_address: String,
    pub shipping_fee: Money,
}

/// A created hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// The checkout-session fields reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A verified webhook delivery, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Money has been collected for this session.
    PaymentSucceeded {
        event_id: String,
        session: CheckoutSessionObject,
    },
    /// Session completed with a delayed payment method still settling.
    AwaitingPayment { event_id: String, session_id: String },
    /// A delayed payment method failed to settle.
    PaymentFailed { event_id: String, session_id: String },
    /// Any other event type.
    Ignored { event_id: String, event_type: String },
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

const SESSION_COMPLETED: &str = "checkout.session.completed";
const ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";
const ASYNC_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";

impl WebhookEvent {
    /// Parse and classify an already-verified payload.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedPayload`] when the payload is not an
    /// event or a checkout event does not carry a session object.
    pub fn parse(payload: &[u8]) -> Result<Self, PaymentError> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;

        let session = |object: serde_json::Value| {
            serde_json::from_value::<CheckoutSessionObject>(object)
                .map_err(|e| PaymentError::MalformedPayload(e.to_string()))
        };

        Ok(match raw.event_type.as_str() {
            SESSION_COMPLETED => {
                let session = session(raw.data.object)?;
                if session.payment_status.as_deref() == Some("paid") {
                    Self::PaymentSucceeded {
                        event_id: raw.id,
                        session,
                    }
                } else {
                    Self::AwaitingPayment {
                        event_id: raw.id,
                        session_id: session.id,
                    }
                }
            }
            ASYNC_PAYMENT_SUCCEEDED => Self::PaymentSucceeded {
                event_id: raw.id,
                session: session(raw.data.object)?,
            },
            ASYNC_PAYMENT_FAILED => Self::PaymentFailed {
                event_id: raw.id,
                session_id: session(raw.data.object)?.id,
            },
            _ => Self::Ignored {
                event_id: raw.id,
                event_type: raw.event_type,
            },
        })
    }
}

/// Hosted checkout and webhook verification.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout page. Nothing is persisted locally.
    async fn create_checkout(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Authenticate a webhook delivery and classify it.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, PaymentError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(event_type: &str, object: &serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({"id": "evt_1", "type": event_type, "data": {"object": object}}))
            .unwrap()
    }

    #[test]
    fn completed_and_paid_is_success() {
        let payload = event(
            SESSION_COMPLETED,
            &json!({
                "id": "cs_1",
                "payment_intent": "pi_123",
                "payment_status": "paid",
                "metadata": {"user_id": "7"}
            }),
        );

        match WebhookEvent::parse(&payload).unwrap() {
            WebhookEvent::PaymentSucceeded { session, .. } => {
                assert_eq!(session.payment_intent.as_deref(), Some("pi_123"));
                assert_eq!(session.metadata["user_id"], "7");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn completed_but_unpaid_awaits_payment() {
        let payload = event(
            SESSION_COMPLETED,
            &json!({"id": "cs_2", "payment_status": "unpaid"}),
        );
        assert_eq!(
            WebhookEvent::parse(&payload).unwrap(),
            WebhookEvent::AwaitingPayment {
                event_id: "evt_1".into(),
                session_id: "cs_2".into()
            }
        );
    }

    #[test]
    fn async_success_counts_regardless_of_status_field() {
        let payload = event(
            ASYNC_PAYMENT_SUCCEEDED,
            &json!({"id": "cs_3", "payment_intent": "pi_9"}),
        );
        assert!(matches!(
            WebhookEvent::parse(&payload).unwrap(),
            WebhookEvent::PaymentSucceeded { .. }
        ));
    }

    #[test]
    fn unknown_events_are_ignored_and_garbage_is_rejected() {
        let payload = event("customer.created", &json!({"id": "cus_1"}));
        assert!(matches!(
            WebhookEvent::parse(&payload).unwrap(),
            WebhookEvent::Ignored { ref event_type, .. } if event_type == "customer.created"
        ));

        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(PaymentError::MalformedPayload(_))
        ));
    }
}
