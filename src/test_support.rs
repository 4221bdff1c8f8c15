// Shared test doubles

use async_trait::async_trait;
use axum::Router;
use http::HeaderMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::notifier::{Notifier, NotifyError};
use crate::orders::customers::CustomerError;
use crate::orders::template::RenderedEmail;
use crate::orders::{Order, OrderNo, PaymentCustomer, PaymentMethod};
use crate::providers::errors::{ProviderError, WebhookError};
use crate::providers::{
    CheckoutSession, PaymentIntentHandle, PaymentProvider, ProviderEvent, RedirectUrls, SubscriptionInfo,
};

pub struct RecordingNotifier {
    sent: Mutex<Vec<RenderedEmail>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let notifier = Self::new();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<RenderedEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &RenderedEmail) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Smtp("relay unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_fake_api(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    None,
    Active,
    LookupFails,
}

pub struct FakeProvider {
    pub subscription: Subscription,
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CardNetwork
    }

    async fn prepare_customer(&self, email: &str) -> Result<Option<PaymentCustomer>, CustomerError> {
        Ok(Some(PaymentCustomer {
            email: email.to_string(),
            external_customer_id: "cus_fake".into(),
            created: chrono::Utc::now(),
        }))
    }

    async fn active_subscription(
        &self,
        _email: &str,
        _customer: Option<&PaymentCustomer>,
    ) -> Result<Option<SubscriptionInfo>, ProviderError> {
        match self.subscription {
            Subscription::None => Ok(None),
            Subscription::Active => Ok(Some(SubscriptionInfo {
                lookup_key: "PREMIUM".into(),
                cancel_at: None,
                current_period_end: None,
            })),
            Subscription::LookupFails => Err(ProviderError::Http("connection reset".into())),
        }
    }

    async fn create_checkout_session(
        &self,
        order: &Order,
        _customer: Option<&PaymentCustomer>,
        redirects: RedirectUrls<'_>,
    ) -> Result<CheckoutSession, ProviderError> {
        Ok(CheckoutSession {
            checkout_url: format!("https://pay.example/session/{}?return={}", order.order_no, redirects.success),
            provider_reference: format!("cs_{}", order.order_no),
        })
    }

    async fn create_payment_intent(
        &self,
        order: &Order,
        _customer: Option<&PaymentCustomer>,
    ) -> Result<PaymentIntentHandle, ProviderError> {
        Ok(PaymentIntentHandle {
            client_secret: format!("pi_{}_secret", order.order_no),
            provider_reference: format!("pi_{}", order.order_no),
        })
    }

    async fn verify_webhook(&self, _payload: &[u8], _headers: &HeaderMap) -> Result<ProviderEvent, WebhookError> {
        Err(WebhookError::MissingSecret)
    }

    async fn resolve_order_reference(&self, _event: &ProviderEvent) -> Result<Option<OrderNo>, WebhookError> {
        Ok(None)
    }
}
