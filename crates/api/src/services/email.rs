//! Transactional e-mail.
//!
//! Messages are composed from Askama templates (plain text + HTML) and
//! handed to a [`Mailer`]. Production uses SMTP via lettre; without SMTP
//! configuration mails are logged and dropped.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;
use zandmarket_core::{Email, Money};

use crate::config::SmtpConfig;
use crate::models::{LineItem, Order, User};

const BRAND: &str = "ZandMarket";

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// A rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Email,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Delivers rendered messages.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError>;
}

/// SMTP delivery (STARTTLS relay).
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    /// # Errors
    ///
    /// Returns error if the relay cannot be configured.
    pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(
                format!("{BRAND} <{}>", self.from_address)
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(email
                .to
                .as_str()
                .parse()
                .map_err(|_| EmailError::InvalidAddress(email.to.to_string()))?)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html),
                    ),
            )?;

        self.transport.send(message).await?;

        info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

/// Used when SMTP is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
        info!(to = %email.to, subject = %email.subject, "SMTP not configured, email dropped");
        Ok(())
    }
}

struct EmailLine<'a> {
    name: &'a str,
    quantity: u32,
    price: String,
}

fn email_lines(items: &[LineItem]) -> Vec<EmailLine<'_>> {
    items
        .iter()
        .map(|item| EmailLine {
            name: &item.name,
            quantity: item.quantity,
            price: item.unit_price.to_string(),
        })
        .collect()
}

#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct OrderConfirmationHtml<'a> {
    name: &'a str,
    order_number: &'a str,
    shipping_address: &'a str,
    lines: &'a [EmailLine<'a>],
    shipping_fee: String,
    total: String,
}

#[derive(Template)]
#[template(path = "email/order_confirmation.txt")]
struct OrderConfirmationText<'a> {
    name: &'a str,
    order_number: &'a str,
    shipping_address: &'a str,
    lines: &'a [EmailLine<'a>],
    shipping_fee: String,
    total: String,
}

#[derive(Template)]
#[template(path = "email/new_order.html")]
struct NewOrderHtml<'a> {
    order_number: &'a str,
    customer: &'a str,
    lines: &'a [EmailLine<'a>],
    shipping_fee: String,
    total: String,
}

#[derive(Template)]
#[template(path = "email/new_order.txt")]
struct NewOrderText<'a> {
    order_number: &'a str,
    customer: &'a str,
    lines: &'a [EmailLine<'a>],
    shipping_fee: String,
    total: String,
}

#[derive(Template)]
#[template(path = "email/status_update.html")]
struct StatusUpdateHtml<'a> {
    name: &'a str,
    order_number: &'a str,
    status: &'a str,
    track_url: &'a str,
    confirm_url: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/status_update.txt")]
struct StatusUpdateText<'a> {
    name: &'a str,
    order_number: &'a str,
    status: &'a str,
    track_url: &'a str,
    confirm_url: Option<&'a str>,
}

/// Buyer's receipt for a freshly paid order.
///
/// # Errors
///
/// Returns an error if a template fails to render.
pub fn order_confirmation(
    buyer: &User,
    order: &Order,
    items: &[LineItem],
    shipping_fee: Money,
) -> Result<OutgoingEmail, EmailError> {
    let lines = email_lines(items);
    let shipping_address = order.shipping_address.as_deref().unwrap_or("N/A");

    let html = OrderConfirmationHtml {
        name: &buyer.name,
        order_number: &order.order_number,
        shipping_address,
        lines: &lines,
        shipping_fee: shipping_fee.to_string(),
        total: order.total_amount.to_string(),
    }
    .render()?;
    let text = OrderConfirmationText {
        name: &buyer.name,
        order_number: &order.order_number,
        shipping_address,
        lines: &lines,
        shipping_fee: shipping_fee.to_string(),
        total: order.total_amount.to_string(),
    }
    .render()?;

    Ok(OutgoingEmail {
        to: buyer.email.clone(),
        subject: format!("{BRAND} Order {}", order.order_number),
        text,
        html,
    })
}

/// Heads-up to one admin that an order needs fulfilling.
///
/// # Errors
///
/// Returns an error if a template fails to render.
pub fn new_order_alert(
    admin: &User,
    customer_name: &str,
    order: &Order,
    items: &[LineItem],
    shipping_fee: Money,
) -> Result<OutgoingEmail, EmailError> {
    let lines = email_lines(items);

    let html = NewOrderHtml {
        order_number: &order.order_number,
        customer: customer_name,
        lines: &lines,
        shipping_fee: shipping_fee.to_string(),
        total: order.total_amount.to_string(),
    }
    .render()?;
    let text = NewOrderText {
        order_number: &order.order_number,
        customer: customer_name,
        lines: &lines,
        shipping_fee: shipping_fee.to_string(),
        total: order.total_amount.to_string(),
    }
    .render()?;

    Ok(OutgoingEmail {
        to: admin.email.clone(),
        subject: format!("New Order: {}", order.order_number),
        text,
        html,
    })
}

/// Tell the buyer their order moved. `confirm_url` is only set once shipped.
///
/// # Errors
///
/// Returns an error if a template fails to render.
pub fn status_update(
    buyer: &User,
    order: &Order,
    track_url: &str,
    confirm_url: Option<&str>,
) -> Result<OutgoingEmail, EmailError> {
    let status = order.status.as_str();

    let html = StatusUpdateHtml {
        name: &buyer.name,
        order_number: &order.order_number,
        status,
        track_url,
        confirm_url,
    }
    .render()?;
    let text = StatusUpdateText {
        name: &buyer.name,
        order_number: &order.order_number,
        status,
        track_url,
        confirm_url,
    }
    .render()?;

    Ok(OutgoingEmail {
        to: buyer.email.clone(),
        subject: format!("Your Order #{} is now {status}", order.order_number),
        text,
        html,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use zandmarket_core::{OrderId, OrderStatus, ProductId, UserId};

    use super::*;

    fn buyer() -> User {
        User {
            id: UserId::new(1),
            name: "Ada <script>".into(),
            email: Email::parse("ada@example.com").unwrap(),
            is_admin: false,
        }
    }

    fn order(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(5),
            order_number: "ORD123".into(),
            user_id: UserId::new(1),
            payment_method: "stripe".into(),
            total_amount: Money::from_minor(2_100),
            shipping_fee: Money::from_minor(100),
            is_paid: true,
            paid_at: Some(now),
            is_shipped: false,
            shipped_at: None,
            is_delivered: false,
            delivered_at: None,
            status,
            shipping_address: Some("1 High St".into()),
            cart_items: None,
            stripe_payment_id: Some("pi_1".into()),
            delivery_token: Some("tok".into()),
            created_at: now,
            updated_at: now,
        }
    }

    fn items() -> Vec<LineItem> {
        vec![LineItem {
            product_id: ProductId::new(1),
            name: "Tea".into(),
            unit_price: Money::from_minor(1_000),
            quantity: 2,
            image: None,
        }]
    }

    #[test]
    fn confirmation_lists_lines_and_escapes_html() {
        let email =
            order_confirmation(&buyer(), &order(OrderStatus::Processing), &items(), Money::from_minor(100))
                .unwrap();

        assert_eq!(email.subject, "ZandMarket Order ORD123");
        assert!(email.text.contains("2 x Tea"));
        assert!(email.text.contains("21.00"));
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
    }

    #[test]
    fn status_update_includes_confirm_link_only_when_given() {
        let shipped = status_update(
            &buyer(),
            &order(OrderStatus::Shipped),
            "https://shop.example/orders/5",
            Some("https://shop.example/orders/5/confirm-delivery?token=tok"),
        )
        .unwrap();
        assert_eq!(shipped.subject, "Your Order #ORD123 is now shipped");
        assert!(shipped.text.contains("confirm-delivery?token=tok"));

        let cancelled = status_update(
            &buyer(),
            &order(OrderStatus::Cancelled),
            "https://shop.example/orders/5",
            None,
        )
        .unwrap();
        assert!(!cancelled.text.contains("confirm-delivery"));
    }

    #[test]
    fn admin_alert_goes_to_the_admin() {
        let admin = User {
            id: UserId::new(2),
            name: "Admin".into(),
            email: Email::parse("admin@example.com").unwrap(),
            is_admin: true,
        };
        let email = new_order_alert(&admin, "Ada", &order(OrderStatus::Processing), &items(), Money::ZERO)
            .unwrap();
        assert_eq!(email.to.as_str(), "admin@example.com");
        assert_eq!(email.subject, "New Order: ORD123");
    }
}
