// Stripe REST client
// Form-encoded requests with bearer auth, idempotency keys and retries on transient failures.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::orders::OrderNo;
use crate::providers::errors::ProviderError;
use crate::providers::retry::{with_retries, RetryPolicy};
use crate::stripe::types::{
    CheckoutSession, Customer, List, PaymentIntent, Price, StripeErrorEnvelope, Subscription,
};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeRestClient {
    pub(crate) http: Client,
    pub(crate) api_base: String,
    pub(crate) api_key: String,
    pub(crate) stripe_version: Option<String>,
    pub(crate) retry: RetryPolicy,
}

/// Parameters for a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionParams<'a> {
    pub order_no: OrderNo,
    pub price_id: &'a str,
    pub quantity: usize,
    pub customer_id: Option<&'a str>,
    pub customer_email: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Debug, Clone)]
pub struct PaymentIntentParams<'a> {
    pub order_no: OrderNo,
    pub amount: i64,
    pub currency: &'a str,
    pub customer_id: Option<&'a str>,
}

impl StripeRestClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self {
            http,
            api_base: STRIPE_API_BASE.to_string(),
            api_key,
            stripe_version: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        if !base.is_empty() {
            self.api_base = base.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn with_version(mut self, ver: impl Into<Option<String>>) -> Self {
        self.stripe_version = ver.into();
        self
    }

    #[allow(dead_code)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn apply_common_headers(&self, req: reqwest::RequestBuilder, idempotency_key: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = req.bearer_auth(&self.api_key);
        if let Some(k) = idempotency_key {
            req = req.header("Idempotency-Key", k);
        }
        if let Some(v) = &self.stripe_version {
            if !v.is_empty() {
                req = req.header("Stripe-Version", v);
            }
        }
        req
    }

    fn map_error(status: StatusCode, body: &str) -> ProviderError {
        if let Ok(env) = serde_json::from_str::<StripeErrorEnvelope>(body) {
            env.into_provider_error(Some(status.as_u16()))
        } else if status.is_server_error() {
            ProviderError::Transient(format!("status={} body={}", status.as_u16(), body))
        } else {
            ProviderError::Api {
                provider: "stripe",
                kind: crate::providers::errors::ApiErrorKind::Unknown,
                message: Some(body.to_string()),
                code: None,
                status: Some(status.as_u16()),
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        desc: &str,
        method: Method,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
        policy: RetryPolicy,
    ) -> Result<T, ProviderError> {
        info!(
            target: "stripe",
            method = %method,
            path = %path,
            idempotency_key = idempotency_key.unwrap_or(""),
            "stripe request"
        );

        let req_builder = || {
            let url = format!("{}{}", self.api_base, path);
            let req = if method == Method::GET {
                self.http.get(url).query(params)
            } else {
                self.http.request(method.clone(), url).form(params)
            };
            let req = self.apply_common_headers(req, idempotency_key);
            async move {
                let resp = req.send().await.map_err(|e| ProviderError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| ProviderError::Decode(e.to_string()))?;
                if status.is_success() {
                    serde_json::from_str::<T>(&text).map_err(|e| ProviderError::Decode(e.to_string()))
                } else {
                    Err(Self::map_error(status, &text))
                }
            }
        };
        with_retries("stripe", desc, policy, req_builder).await
    }

    // POST /v1/customers
    #[instrument(skip(self), fields(method = "POST", path = "/v1/customers"))]
    pub async fn create_customer(&self, email: &str) -> Result<Customer, ProviderError> {
        let form = vec![("description".to_string(), email.to_string())];
        // Same email, same key: concurrent first purchases collapse into one Stripe customer.
        let idempotency_key = customer_idempotency_key(email);
        self.execute(
            "create_customer",
            Method::POST,
            "/v1/customers",
            &form,
            Some(&idempotency_key),
            self.retry,
        )
        .await
    }

    // POST /v1/checkout/sessions
    #[instrument(skip(self, params), fields(method = "POST", path = "/v1/checkout/sessions", order_no = params.order_no))]
    pub async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams<'_>,
    ) -> Result<CheckoutSession, ProviderError> {
        let order_no = params.order_no.to_string();
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("line_items[0][price]".into(), params.price_id.to_string()),
            ("line_items[0][quantity]".into(), params.quantity.to_string()),
            ("success_url".into(), params.success_url.to_string()),
            ("cancel_url".into(), params.cancel_url.to_string()),
            ("client_reference_id".into(), order_no.clone()),
            ("metadata[order_no]".into(), order_no.clone()),
            ("payment_intent_data[metadata][order_no]".into(), order_no.clone()),
        ];
        match params.customer_id {
            Some(customer) => form.push(("customer".into(), customer.to_string())),
            None => form.push(("customer_email".into(), params.customer_email.to_string())),
        }

        let idempotency_key = format!("checkout-session-order-{order_no}");
        self.execute(
            "create_checkout_session",
            Method::POST,
            "/v1/checkout/sessions",
            &form,
            Some(&idempotency_key),
            self.retry,
        )
        .await
    }

    // POST /v1/payment_intents
    #[instrument(skip(self, params), fields(method = "POST", path = "/v1/payment_intents", order_no = params.order_no))]
    pub async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams<'_>,
    ) -> Result<PaymentIntent, ProviderError> {
        if params.amount < 0 {
            return Err(ProviderError::Precondition("amount must be non-negative".into()));
        }

        let order_no = params.order_no.to_string();
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), params.amount.to_string()),
            ("currency".into(), params.currency.to_ascii_lowercase()),
            ("payment_method_types[]".into(), "card".into()),
            // Read back by the webhook when the intent succeeds.
            ("description".into(), order_no.clone()),
            ("metadata[order_no]".into(), order_no.clone()),
        ];
        if let Some(customer) = params.customer_id {
            form.push(("customer".into(), customer.to_string()));
            form.push(("setup_future_usage".into(), "on_session".into()));
        }

        let idempotency_key = format!("payment-intent-order-{order_no}");
        self.execute(
            "create_payment_intent",
            Method::POST,
            "/v1/payment_intents",
            &form,
            Some(&idempotency_key),
            self.retry,
        )
        .await
    }

    // GET /v1/prices/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v1/prices/{id}"))]
    pub async fn retrieve_price(&self, price_id: &str) -> Result<Price, ProviderError> {
        let path = format!("/v1/prices/{price_id}");
        self.execute("retrieve_price", Method::GET, &path, &[], None, self.retry.lightweight())
            .await
    }

    // GET /v1/subscriptions?customer=...&status=active
    #[instrument(skip(self), fields(method = "GET", path = "/v1/subscriptions"))]
    pub async fn list_active_subscriptions(&self, customer_id: &str) -> Result<List<Subscription>, ProviderError> {
        let query = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("status".to_string(), "active".to_string()),
        ];
        self.execute(
            "list_subscriptions",
            Method::GET,
            "/v1/subscriptions",
            &query,
            None,
            self.retry.lightweight(),
        )
        .await
    }
}

fn customer_idempotency_key(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_ascii_lowercase().as_bytes());
    format!("customer-{}", hex::encode(digest))
}
