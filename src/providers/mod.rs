// Uniform contract over the external payment processors

pub mod errors;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::orders::customers::CustomerError;
use crate::orders::{Order, OrderNo, PaymentCustomer, PaymentMethod};
use self::errors::{ProviderError, WebhookError};

/// Normalized callback kind. Only the first two complete an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutCompleted,
    PaymentSucceeded,
    Other(String),
}

impl EventKind {
    pub fn completes_order(&self) -> bool {
        matches!(self, EventKind::CheckoutCompleted | EventKind::PaymentSucceeded)
    }
}

/// An authenticated provider callback that has not yet been correlated to an order.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub provider: PaymentMethod,
    pub id: String,
    pub event_type: String,
    pub kind: EventKind,
    pub object: serde_json::Value,
}

/// Provider callback reduced to what the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEvent {
    pub provider: PaymentMethod,
    pub kind: EventKind,
    pub order_reference: OrderNo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub lookup_key: String,
    pub cancel_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RedirectUrls<'a> {
    pub success: &'a str,
    pub cancel: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub provider_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentHandle {
    pub client_secret: String,
    pub provider_reference: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Resolve the provider-side customer for `email`, creating it on first use.
    async fn prepare_customer(&self, _email: &str) -> Result<Option<PaymentCustomer>, CustomerError> {
        Ok(None)
    }

    /// Active subscription granting free rentals, if any.
    async fn active_subscription(
        &self,
        _email: &str,
        _customer: Option<&PaymentCustomer>,
    ) -> Result<Option<SubscriptionInfo>, ProviderError> {
        Ok(None)
    }

    async fn create_checkout_session(
        &self,
        order: &Order,
        customer: Option<&PaymentCustomer>,
        redirects: RedirectUrls<'_>,
    ) -> Result<CheckoutSession, ProviderError>;

    async fn create_payment_intent(
        &self,
        order: &Order,
        customer: Option<&PaymentCustomer>,
    ) -> Result<PaymentIntentHandle, ProviderError>;

    /// Authenticate a raw callback. Must fail before anything is mutated.
    async fn verify_webhook(&self, payload: &[u8], headers: &HeaderMap) -> Result<ProviderEvent, WebhookError>;

    /// Extract the order number threaded through the provider's metadata.
    async fn resolve_order_reference(&self, event: &ProviderEvent) -> Result<Option<OrderNo>, WebhookError>;
}

/// Configured adapters keyed by payment method.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<PaymentMethod, Arc<dyn PaymentProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.method(), provider);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&method).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Parse an order number carried as provider metadata.
pub fn parse_order_reference(raw: &str) -> Option<OrderNo> {
    raw.trim().parse::<OrderNo>().ok().filter(|n| *n > 0)
}
