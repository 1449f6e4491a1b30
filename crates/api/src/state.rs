//! Application state shared across handlers.

use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use secrecy::ExposeSecret;

use crate::config::ApiConfig;
use crate::db::Store;
use crate::payments::PaymentGateway;
use crate::services::email::Mailer;

/// Application state shared across all handlers.
///
/// Cheap to clone. Collaborators are trait objects so tests can swap in the
/// in-memory store and recording fakes.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ApiConfig,
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    jwt_key: DecodingKey,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let jwt_key = DecodingKey::from_secret(config.jwt_secret.expose_secret().as_bytes());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                gateway,
                mailer,
                jwt_key,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    #[must_use]
    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.inner.gateway.as_ref()
    }

    #[must_use]
    pub fn mailer(&self) -> &dyn Mailer {
        self.inner.mailer.as_ref()
    }

    /// Key for verifying bearer tokens.
    #[must_use]
    pub fn jwt_key(&self) -> &DecodingKey {
        &self.inner.jwt_key
    }
}
