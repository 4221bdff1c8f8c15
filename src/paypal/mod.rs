// PayPal provider module (wallet)

pub mod rest;
pub mod types;
pub mod webhook;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::database::ShopDatabase;
use crate::orders::template::SHOP_NAME;
use crate::orders::{Order, OrderNo, PaymentCustomer, PaymentMethod};
use crate::providers::errors::{ProviderError, WebhookError};
use crate::providers::{
    parse_order_reference, CheckoutSession, PaymentIntentHandle, PaymentProvider, ProviderEvent,
    RedirectUrls, SubscriptionInfo,
};
use crate::settings::PayPalSettings;
use self::rest::PayPalRestClient;
use self::types::{ApplicationContext, CreateOrderRequest, Money, PurchaseUnitRequest};

pub struct PayPalProvider {
    pub(crate) cfg: PayPalSettings,
    pub(crate) rest: PayPalRestClient,
    db: ShopDatabase,
}

impl PayPalProvider {
    pub fn new(cfg: PayPalSettings, db: ShopDatabase) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let rest = PayPalRestClient::new(http, cfg.client_id.clone(), cfg.client_secret.clone())
            .with_base_url(cfg.api_base.clone());

        Ok(Self::with_rest(cfg, rest, db))
    }

    pub fn with_rest(cfg: PayPalSettings, rest: PayPalRestClient, db: ShopDatabase) -> Self {
        Self { cfg, rest, db }
    }

    fn order_amount(&self, order: &Order) -> Result<Money, ProviderError> {
        let unit = parse_minor_units(&self.cfg.rental_price).ok_or_else(|| {
            ProviderError::Precondition(format!("PAYPAL_RENTAL_PRICE is not a valid amount: {:?}", self.cfg.rental_price))
        })?;
        let total = unit
            .checked_mul(order.cart_items.len() as u64)
            .ok_or_else(|| ProviderError::Precondition("order amount overflows".into()))?;
        Ok(Money {
            currency_code: self.cfg.currency.clone(),
            value: format_minor_units(total),
        })
    }

    fn order_request(&self, order: &Order, context: Option<ApplicationContext>) -> Result<CreateOrderRequest, ProviderError> {
        Ok(CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnitRequest {
                reference_id: order.order_no.to_string(),
                custom_id: order.order_no.to_string(),
                description: format!("{} rental order #{}", SHOP_NAME, order.order_no),
                amount: self.order_amount(order)?,
            }],
            application_context: context,
        })
    }
}

/// Parses a decimal amount such as "3.5" or "3.00" into cents.
pub fn parse_minor_units(value: &str) -> Option<u64> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() || frac.len() > 2 {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let cents: u64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<u64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(cents)
}

pub fn format_minor_units(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    /// Wallet buyers have no provider customer; the subscription is keyed by email.
    #[instrument(skip(self, _customer))]
    async fn active_subscription(
        &self,
        email: &str,
        _customer: Option<&PaymentCustomer>,
    ) -> Result<Option<SubscriptionInfo>, ProviderError> {
        let Some(subscription_id) = self.db.get_paypal_subscription(email)? else {
            return Ok(None);
        };

        let subscription = self.rest.get_subscription(&subscription_id).await?;
        let Some((plan_id, next_billing_time)) = subscription.active_plan() else {
            debug!(%subscription_id, status = %subscription.status, "PayPal subscription not active");
            return Ok(None);
        };

        let plan = self.rest.get_plan(plan_id).await?;
        let lookup_key = plan
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ProviderError::Decode(format!("paypal plan {plan_id} has no name")))?;

        Ok(Some(SubscriptionInfo {
            lookup_key,
            cancel_at: None,
            current_period_end: Some(next_billing_time),
        }))
    }

    #[instrument(skip(self, order, _customer, redirects), fields(order_no = order.order_no))]
    async fn create_checkout_session(
        &self,
        order: &Order,
        _customer: Option<&PaymentCustomer>,
        redirects: RedirectUrls<'_>,
    ) -> Result<CheckoutSession, ProviderError> {
        let request = self.order_request(
            order,
            Some(ApplicationContext {
                brand_name: SHOP_NAME.to_string(),
                return_url: format!("{}?orderId={}", redirects.success, order.id),
                cancel_url: redirects.cancel.to_string(),
                user_action: "PAY_NOW",
                shipping_preference: "NO_SHIPPING",
            }),
        )?;
        let paypal_order = self
            .rest
            .create_order(&request, &format!("order-{}", order.order_no))
            .await?;

        let checkout_url = paypal_order
            .approve_link()
            .ok_or_else(|| ProviderError::Decode("paypal order has no approve link".into()))?
            .to_string();
        debug!(paypal_order_id = %paypal_order.id, "Created PayPal order");

        Ok(CheckoutSession {
            checkout_url,
            provider_reference: paypal_order.id,
        })
    }

    /// The storefront's PayPal buttons approve and capture the returned order id.
    #[instrument(skip(self, order, _customer), fields(order_no = order.order_no))]
    async fn create_payment_intent(
        &self,
        order: &Order,
        _customer: Option<&PaymentCustomer>,
    ) -> Result<PaymentIntentHandle, ProviderError> {
        let request = self.order_request(order, None)?;
        let paypal_order = self
            .rest
            .create_order(&request, &format!("intent-{}", order.order_no))
            .await?;

        Ok(PaymentIntentHandle {
            client_secret: paypal_order.id.clone(),
            provider_reference: paypal_order.id,
        })
    }

    async fn verify_webhook(&self, payload: &[u8], headers: &http::HeaderMap) -> Result<ProviderEvent, WebhookError> {
        let raw = webhook::parse_payload(payload)?;
        let request = webhook::build_verification_request(headers, &self.cfg.webhook_id, raw)?;

        let response = self
            .rest
            .verify_webhook_signature(&request)
            .await
            .map_err(|e| WebhookError::VerificationUnavailable(e.to_string()))?;
        if response.verification_status != webhook::VERIFICATION_SUCCESS {
            return Err(WebhookError::InvalidSignature(format!(
                "verification_status={}",
                response.verification_status
            )));
        }

        webhook::to_provider_event(&request.webhook_event)
    }

    async fn resolve_order_reference(&self, event: &ProviderEvent) -> Result<Option<OrderNo>, WebhookError> {
        // Capture resources embed the custom_id directly; fall back to the order lookup.
        if let Some(reference) = event
            .object
            .get("custom_id")
            .and_then(|v| v.as_str())
            .and_then(parse_order_reference)
        {
            return Ok(Some(reference));
        }

        let Some(paypal_order_id) = webhook::provider_order_id(event) else {
            warn!(event_id = %event.id, "PayPal event carries no order id");
            return Ok(None);
        };

        let paypal_order = self
            .rest
            .get_order(paypal_order_id)
            .await
            .map_err(|e| WebhookError::ProcessingFailed(format!("order lookup failed: {e}")))?;

        Ok(paypal_order.custom_id().and_then(parse_order_reference))
    }
}
