// Checkout orchestration: order creation, subscription discount, provider session

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::database::{ShopDatabase, StoreError};
use crate::orders::completion::{CompletionError, OrderCompletionService};
use crate::orders::customers::CustomerError;
use crate::orders::{NewOrder, Order, PaymentCustomer};
use crate::providers::errors::ProviderError;
use crate::providers::{PaymentProvider, RedirectUrls};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("upstream error: {0}")]
    Upstream(#[from] ProviderError),
    #[error("customer error: {0}")]
    Customer(#[from] CustomerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("order completion failed: {0}")]
    Completion(#[from] CompletionError),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub email: &'a str,
    pub cart_items: &'a [String],
    pub success_url: &'a str,
    pub cancel_url: &'a str,
    /// Redirect used when a subscription makes the rental free.
    pub success_no_checkout_url: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentIntentResult {
    Pending { client_secret: String, order_id: Uuid },
    /// Covered by an active subscription; the order is already confirmed.
    SubscriptionActive { order_id: Uuid },
}

pub struct CheckoutService {
    db: ShopDatabase,
    completion: Arc<OrderCompletionService>,
}

impl CheckoutService {
    pub fn new(db: ShopDatabase, completion: Arc<OrderCompletionService>) -> Self {
        Self { db, completion }
    }

    /// Returns the URL the buyer is redirected to.
    #[instrument(skip_all, fields(provider = %provider.method(), email = %req.email))]
    pub async fn create_checkout(
        &self,
        provider: &dyn PaymentProvider,
        req: CheckoutRequest<'_>,
    ) -> Result<String, CheckoutError> {
        validate_cart(req.cart_items)?;
        if req.success_url.trim().is_empty() || req.cancel_url.trim().is_empty() {
            return Err(CheckoutError::InvalidInput("redirect URLs are required".into()));
        }

        let (order, customer) = self.start_order(provider, req.email, req.cart_items).await?;

        if self.subscription_covers(provider, req.email, customer.as_ref()).await {
            self.completion.complete_order(order.order_no).await?;
            let target = req
                .success_no_checkout_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or(req.success_url);
            return Ok(format!("{}?orderId={}", target, order.id));
        }

        let session = provider
            .create_checkout_session(
                &order,
                customer.as_ref(),
                RedirectUrls {
                    success: req.success_url,
                    cancel: req.cancel_url,
                },
            )
            .await?;
        info!(order_no = order.order_no, reference = %session.provider_reference, "Checkout session created");
        Ok(session.checkout_url)
    }

    #[instrument(skip_all, fields(provider = %provider.method(), email = %email))]
    pub async fn create_payment_intent(
        &self,
        provider: &dyn PaymentProvider,
        email: &str,
        cart_items: &[String],
    ) -> Result<PaymentIntentResult, CheckoutError> {
        validate_cart(cart_items)?;
        let (order, customer) = self.start_order(provider, email, cart_items).await?;

        if self.subscription_covers(provider, email, customer.as_ref()).await {
            self.completion.complete_order(order.order_no).await?;
            return Ok(PaymentIntentResult::SubscriptionActive { order_id: order.id });
        }

        let handle = provider.create_payment_intent(&order, customer.as_ref()).await?;
        info!(order_no = order.order_no, reference = %handle.provider_reference, "Payment intent created");
        Ok(PaymentIntentResult::Pending {
            client_secret: handle.client_secret,
            order_id: order.id,
        })
    }

    async fn start_order(
        &self,
        provider: &dyn PaymentProvider,
        email: &str,
        cart_items: &[String],
    ) -> Result<(Order, Option<PaymentCustomer>), CheckoutError> {
        let customer = provider.prepare_customer(email).await?;
        let order = self.db.insert_order(NewOrder {
            email: email.to_string(),
            cart_items: cart_items.to_vec(),
            payment_method: provider.method(),
        })?;
        info!(order_no = order.order_no, order_id = %order.id, "Order created");
        Ok((order, customer))
    }

    // Lookup failures only cost the buyer the discount.
    async fn subscription_covers(
        &self,
        provider: &dyn PaymentProvider,
        email: &str,
        customer: Option<&PaymentCustomer>,
    ) -> bool {
        match provider.active_subscription(email, customer).await {
            Ok(Some(sub)) => {
                info!(
                    lookup_key = %sub.lookup_key,
                    cancel_at = ?sub.cancel_at,
                    current_period_end = ?sub.current_period_end,
                    "Active subscription covers rental"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Subscription lookup failed; charging normally");
                false
            }
        }
    }
}

fn validate_cart(cart_items: &[String]) -> Result<(), CheckoutError> {
    if cart_items.is_empty() {
        return Err(CheckoutError::InvalidInput("Cart is empty".into()));
    }
    if cart_items.iter().any(|item| item.trim().is_empty()) {
        return Err(CheckoutError::InvalidInput("Cart contains a blank item".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderStatus, PaymentMethod};
    use crate::test_support::{FakeProvider, RecordingNotifier, Subscription};

    fn service() -> (CheckoutService, ShopDatabase, Arc<RecordingNotifier>) {
        let db = ShopDatabase::in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let completion = Arc::new(OrderCompletionService::new(db.clone(), notifier.clone()));
        (CheckoutService::new(db.clone(), completion), db, notifier)
    }

    fn request<'a>(items: &'a [String]) -> CheckoutRequest<'a> {
        CheckoutRequest {
            email: "renter@example.com",
            cart_items: items,
            success_url: "https://shop/success",
            cancel_url: "https://shop/cart",
            success_no_checkout_url: Some("https://shop/thanks"),
        }
    }

    #[tokio::test]
    async fn test_empty_cart_persists_nothing() {
        let (service, db, _) = service();
        let provider = FakeProvider { subscription: Subscription::None };

        let err = service.create_checkout(&provider, request(&[])).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidInput(_)));

        let blank = vec!["tt001".to_string(), "  ".to_string()];
        let err = service.create_payment_intent(&provider, "renter@example.com", &blank).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidInput(_)));

        assert_eq!(db.order_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_checkout_creates_pending_order() {
        let (service, db, notifier) = service();
        let provider = FakeProvider { subscription: Subscription::None };
        let items = vec!["tt001".to_string(), "tt002".to_string()];

        let url = service.create_checkout(&provider, request(&items)).await.unwrap();
        assert_eq!(url, "https://pay.example/session/1?return=https://shop/success");

        let order = db.get_order(1).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PaymentInitiated);
        assert_eq!(order.cart_items, items);
        assert_eq!(order.payment_method, PaymentMethod::CardNetwork);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_lookup_failure_still_charges() {
        let (service, db, _) = service();
        let provider = FakeProvider { subscription: Subscription::LookupFails };
        let items = vec!["tt001".to_string()];

        let result = service.create_payment_intent(&provider, "renter@example.com", &items).await.unwrap();
        let order = db.get_order(1).unwrap().unwrap();
        assert_eq!(
            result,
            PaymentIntentResult::Pending { client_secret: "pi_1_secret".into(), order_id: order.id }
        );
        assert_eq!(order.status, OrderStatus::PaymentInitiated);
    }

    #[tokio::test]
    async fn test_active_subscription_completes_immediately() {
        let (service, db, notifier) = service();
        let provider = FakeProvider { subscription: Subscription::Active };
        let items = vec!["tt001".to_string()];

        let url = service.create_checkout(&provider, request(&items)).await.unwrap();
        let order = db.get_order(1).unwrap().unwrap();
        assert_eq!(url, format!("https://shop/thanks?orderId={}", order.id));
        assert_eq!(order.status, OrderStatus::PaymentConfirmed);
        assert_eq!(notifier.sent().len(), 1);

        let result = service.create_payment_intent(&provider, "renter@example.com", &items).await.unwrap();
        let second = db.get_order(2).unwrap().unwrap();
        assert_eq!(result, PaymentIntentResult::SubscriptionActive { order_id: second.id });
        assert_eq!(second.status, OrderStatus::PaymentConfirmed);
    }
}
