// Stripe provider module (card network)

pub mod rest;
pub mod types;
pub mod webhook;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::database::ShopDatabase;
use crate::orders::customers::{CustomerError, CustomerProvider, CustomerRegistry};
use crate::orders::{Order, OrderNo, PaymentCustomer, PaymentMethod};
use crate::providers::errors::{ProviderError, WebhookError};
use crate::providers::{
    CheckoutSession, PaymentIntentHandle, PaymentProvider, ProviderEvent, RedirectUrls,
    SubscriptionInfo,
};
use crate::settings::StripeSettings;
use self::rest::{CheckoutSessionParams, PaymentIntentParams, StripeRestClient};

#[async_trait]
impl CustomerProvider for StripeRestClient {
    async fn create_customer(&self, email: &str) -> Result<String, ProviderError> {
        Ok(StripeRestClient::create_customer(self, email).await?.id)
    }
}

pub struct StripeProvider {
    pub(crate) cfg: StripeSettings,
    pub(crate) rest: StripeRestClient,
    pub(crate) customers: CustomerRegistry,
}

impl StripeProvider {
    // Build reqwest client with rustls and timeout from cfg
    pub fn new(cfg: StripeSettings, db: ShopDatabase) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let rest = StripeRestClient::new(http, cfg.api_key.clone())
            .with_base_url(cfg.api_base.clone())
            .with_version(if cfg.stripe_version.is_empty() { None } else { Some(cfg.stripe_version.clone()) });

        Ok(Self::with_rest(cfg, rest, db))
    }

    pub fn with_rest(cfg: StripeSettings, rest: StripeRestClient, db: ShopDatabase) -> Self {
        let customers = CustomerRegistry::new(db, Arc::new(rest.clone()));
        Self { cfg, rest, customers }
    }

    fn price_id(&self) -> Result<&str, ProviderError> {
        if self.cfg.price_id.is_empty() {
            return Err(ProviderError::Precondition("DVD_RENT_PRICE_ID must be configured".into()));
        }
        Ok(&self.cfg.price_id)
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CardNetwork
    }

    async fn prepare_customer(&self, email: &str) -> Result<Option<PaymentCustomer>, CustomerError> {
        self.customers.get_or_create(email).await.map(Some)
    }

    async fn active_subscription(
        &self,
        _email: &str,
        customer: Option<&PaymentCustomer>,
    ) -> Result<Option<SubscriptionInfo>, ProviderError> {
        let Some(customer) = customer else {
            return Ok(None);
        };

        let subscriptions = self
            .rest
            .list_active_subscriptions(&customer.external_customer_id)
            .await?;

        let info = subscriptions.data.into_iter().find_map(|sub| {
            let lookup_key = sub.items.data.first()?.price.lookup_key.clone()?;
            Some(SubscriptionInfo {
                lookup_key,
                cancel_at: sub.cancel_at.and_then(|t| DateTime::from_timestamp(t, 0)),
                current_period_end: sub.current_period_end.and_then(|t| DateTime::from_timestamp(t, 0)),
            })
        });
        Ok(info)
    }

    #[instrument(skip(self, order, customer, redirects), fields(order_no = order.order_no))]
    async fn create_checkout_session(
        &self,
        order: &Order,
        customer: Option<&PaymentCustomer>,
        redirects: RedirectUrls<'_>,
    ) -> Result<CheckoutSession, ProviderError> {
        let success_url = format!("{}?orderId={}", redirects.success, order.id);
        let session = self
            .rest
            .create_checkout_session(&CheckoutSessionParams {
                order_no: order.order_no,
                price_id: self.price_id()?,
                quantity: order.cart_items.len(),
                customer_id: customer.map(|c| c.external_customer_id.as_str()),
                customer_email: &order.email,
                success_url: &success_url,
                cancel_url: redirects.cancel,
            })
            .await?;

        let checkout_url = session
            .url
            .ok_or_else(|| ProviderError::Decode("checkout session has no url".into()))?;
        debug!(session_id = %session.id, "Created Stripe checkout session");

        Ok(CheckoutSession {
            checkout_url,
            provider_reference: session.id,
        })
    }

    #[instrument(skip(self, order, customer), fields(order_no = order.order_no))]
    async fn create_payment_intent(
        &self,
        order: &Order,
        customer: Option<&PaymentCustomer>,
    ) -> Result<PaymentIntentHandle, ProviderError> {
        let price = self.rest.retrieve_price(self.price_id()?).await?;
        let unit_amount = price
            .unit_amount
            .ok_or_else(|| ProviderError::Precondition(format!("price {} has no unit_amount", price.id)))?;
        let amount = unit_amount
            .checked_mul(order.cart_items.len() as i64)
            .ok_or_else(|| ProviderError::Precondition("order amount overflows".into()))?;

        let intent = self
            .rest
            .create_payment_intent(&PaymentIntentParams {
                order_no: order.order_no,
                amount,
                currency: &price.currency,
                customer_id: customer.map(|c| c.external_customer_id.as_str()),
            })
            .await?;

        let client_secret = intent
            .client_secret
            .ok_or_else(|| ProviderError::Decode("payment intent has no client_secret".into()))?;

        Ok(PaymentIntentHandle {
            client_secret,
            provider_reference: intent.id,
        })
    }

    async fn verify_webhook(&self, payload: &[u8], headers: &http::HeaderMap) -> Result<ProviderEvent, WebhookError> {
        webhook::verify_signature(
            payload,
            headers,
            &self.cfg.webhook_secret,
            self.cfg.webhook_tolerance_seconds,
        )?;
        webhook::parse_event(payload)
    }

    async fn resolve_order_reference(&self, event: &ProviderEvent) -> Result<Option<OrderNo>, WebhookError> {
        Ok(webhook::extract_order_reference(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::retry::RetryPolicy;
    use crate::test_support::spawn_fake_api;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    fn settings() -> StripeSettings {
        StripeSettings {
            api_key: "sk_test".into(),
            price_id: "price_rent".into(),
            webhook_secret: "whsec_test".into(),
            ..StripeSettings::default()
        }
    }

    fn provider(base: &str, db: ShopDatabase) -> StripeProvider {
        let rest = StripeRestClient::new(Client::new(), "sk_test".into())
            .with_base_url(base)
            .with_retry(RetryPolicy::new(0, 1, 1));
        StripeProvider::with_rest(settings(), rest, db)
    }

    fn customer() -> PaymentCustomer {
        PaymentCustomer {
            email: "renter@example.com".into(),
            external_customer_id: "cus_1".into(),
            created: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_active_subscription_reads_lookup_key() {
        let router = Router::new().route(
            "/v1/subscriptions",
            get(|| async {
                Json(json!({
                    "data": [{
                        "id": "sub_1",
                        "status": "active",
                        "current_period_end": 1_700_000_000,
                        "items": { "data": [{ "id": "si_1", "price": { "id": "price_sub", "currency": "usd", "lookup_key": "PREMIUM" } }] }
                    }],
                    "has_more": false
                }))
            }),
        );
        let base = spawn_fake_api(router).await;
        let provider = provider(&base, ShopDatabase::in_memory().unwrap());

        let info = provider.active_subscription("renter@example.com", Some(&customer())).await.unwrap().unwrap();
        assert_eq!(info.lookup_key, "PREMIUM");
        assert!(info.current_period_end.is_some());
        assert!(info.cancel_at.is_none());

        assert!(provider.active_subscription("renter@example.com", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payment_intent_amount_is_price_times_items() {
        let router = Router::new()
            .route(
                "/v1/prices/price_rent",
                get(|| async { Json(json!({ "id": "price_rent", "currency": "usd", "unit_amount": 350 })) }),
            )
            .route(
                "/v1/payment_intents",
                post(|axum::Form(form): axum::Form<std::collections::HashMap<String, String>>| async move {
                    Json(json!({
                        "id": "pi_1",
                        "status": "requires_payment_method",
                        "amount": form["amount"].parse::<i64>().unwrap(),
                        "currency": form["currency"],
                        "client_secret": format!("pi_1_secret_{}", form["description"]),
                    }))
                }),
            );
        let base = spawn_fake_api(router).await;
        let db = ShopDatabase::in_memory().unwrap();
        let provider = provider(&base, db.clone());

        let order = db
            .insert_order(crate::orders::NewOrder {
                email: "renter@example.com".into(),
                cart_items: vec!["tt001".into(), "tt002".into()],
                payment_method: PaymentMethod::CardNetwork,
            })
            .unwrap();

        let handle = provider.create_payment_intent(&order, Some(&customer())).await.unwrap();
        assert_eq!(handle.client_secret, "pi_1_secret_1");
        assert_eq!(handle.provider_reference, "pi_1");
    }

    #[tokio::test]
    async fn test_checkout_requires_price_id() {
        let db = ShopDatabase::in_memory().unwrap();
        let rest = StripeRestClient::new(Client::new(), "sk_test".into()).with_base_url("http://127.0.0.1:9");
        let provider = StripeProvider::with_rest(
            StripeSettings {
                price_id: String::new(),
                ..settings()
            },
            rest,
            db.clone(),
        );
        let order = db
            .insert_order(crate::orders::NewOrder {
                email: "renter@example.com".into(),
                cart_items: vec!["tt001".into()],
                payment_method: PaymentMethod::CardNetwork,
            })
            .unwrap();

        let err = provider
            .create_checkout_session(&order, None, RedirectUrls { success: "https://s", cancel: "https://c" })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Precondition(_)));
    }
}
