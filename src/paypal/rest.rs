// PayPal REST client
// OAuth2 client-credentials access token (cached), Orders v2, billing subscriptions
// and webhook signature verification.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::providers::errors::{ApiErrorKind, ProviderError};
use crate::providers::retry::{with_retries, RetryPolicy};
use crate::paypal::types::{
    AccessToken, CreateOrderRequest, PayPalErrorEnvelope, PayPalOrder, PayPalPlan, PayPalSubscription,
    VerifyWebhookSignatureRequest, VerifyWebhookSignatureResponse,
};

pub const PAYPAL_API_BASE: &str = "https://api-m.sandbox.paypal.com";

// Refresh this long before PayPal's stated expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct PayPalRestClient {
    pub(crate) http: Client,
    pub(crate) api_base: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) retry: RetryPolicy,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl PayPalRestClient {
    pub fn new(http: Client, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            api_base: PAYPAL_API_BASE.to_string(),
            client_id,
            client_secret,
            retry: RetryPolicy::default(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        if !base.is_empty() {
            self.api_base = base.trim_end_matches('/').to_string();
        }
        self
    }

    #[allow(dead_code)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn map_error(status: StatusCode, body: &str) -> ProviderError {
        if let Ok(env) = serde_json::from_str::<PayPalErrorEnvelope>(body) {
            if env.name.is_some() || env.error.is_some() {
                return env.into_provider_error(Some(status.as_u16()));
            }
        }
        if status.is_server_error() {
            ProviderError::Transient(format!("status={} body={}", status.as_u16(), body))
        } else {
            ProviderError::Api {
                provider: "paypal",
                kind: ApiErrorKind::Unknown,
                message: Some(body.to_string()),
                code: None,
                status: Some(status.as_u16()),
            }
        }
    }

    async fn read_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::Decode(e.to_string()))?;
        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ProviderError::Decode(e.to_string()))
        } else {
            Err(Self::map_error(status, &text))
        }
    }

    /// Bearer token for REST calls, fetched with client credentials and cached until near expiry.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<String, ProviderError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(ProviderError::Precondition(
                "PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET must be configured".into(),
            ));
        }

        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut cached = self.token.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let basic = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let url = format!("{}/v1/oauth2/token", self.api_base);
        let token: AccessToken = with_retries("paypal", "access_token", self.retry, || {
            let req = self
                .http
                .post(url.clone())
                .header(reqwest::header::AUTHORIZATION, format!("Basic {basic}"))
                .form(&[("grant_type", "client_credentials")]);
            async move {
                let resp = req.send().await.map_err(|e| ProviderError::Http(e.to_string()))?;
                Self::read_response(resp).await
            }
        })
        .await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!(expires_in = token.expires_in, "Fetched PayPal access token");

        Ok(token.access_token)
    }

    async fn execute<B, T>(
        &self,
        desc: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
        request_id: Option<&str>,
        policy: RetryPolicy,
    ) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let token = self.access_token().await?;
        info!(
            target: "paypal",
            method = %method,
            path = %path,
            request_id = request_id.unwrap_or(""),
            "paypal request"
        );

        let req_builder = || {
            let url = format!("{}{}", self.api_base, path);
            let mut req = self.http.request(method.clone(), url).bearer_auth(&token);
            if let Some(body) = body {
                req = req.json(body);
            }
            if let Some(id) = request_id {
                req = req.header("PayPal-Request-Id", id);
            }
            async move {
                let resp = req.send().await.map_err(|e| ProviderError::Http(e.to_string()))?;
                Self::read_response(resp).await
            }
        };
        with_retries("paypal", desc, policy, req_builder).await
    }

    // POST /v2/checkout/orders
    #[instrument(skip(self, request), fields(method = "POST", path = "/v2/checkout/orders"))]
    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
        request_id: &str,
    ) -> Result<PayPalOrder, ProviderError> {
        self.execute(
            "create_order",
            Method::POST,
            "/v2/checkout/orders",
            Some(request),
            Some(request_id),
            self.retry,
        )
        .await
    }

    // GET /v2/checkout/orders/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v2/checkout/orders/{id}"))]
    pub async fn get_order(&self, order_id: &str) -> Result<PayPalOrder, ProviderError> {
        let path = format!("/v2/checkout/orders/{order_id}");
        self.execute::<(), _>("get_order", Method::GET, &path, None, None, self.retry.lightweight())
            .await
    }

    // GET /v1/billing/subscriptions/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v1/billing/subscriptions/{id}"))]
    pub async fn get_subscription(&self, subscription_id: &str) -> Result<PayPalSubscription, ProviderError> {
        let path = format!("/v1/billing/subscriptions/{subscription_id}");
        self.execute::<(), _>("get_subscription", Method::GET, &path, None, None, self.retry.lightweight())
            .await
    }

    // GET /v1/billing/plans/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v1/billing/plans/{id}"))]
    pub async fn get_plan(&self, plan_id: &str) -> Result<PayPalPlan, ProviderError> {
        let path = format!("/v1/billing/plans/{plan_id}");
        self.execute::<(), _>("get_plan", Method::GET, &path, None, None, self.retry.lightweight())
            .await
    }

    // POST /v1/notifications/verify-webhook-signature
    #[instrument(skip(self, request), fields(method = "POST", path = "/v1/notifications/verify-webhook-signature"))]
    pub async fn verify_webhook_signature(
        &self,
        request: &VerifyWebhookSignatureRequest,
    ) -> Result<VerifyWebhookSignatureResponse, ProviderError> {
        self.execute(
            "verify_webhook_signature",
            Method::POST,
            "/v1/notifications/verify-webhook-signature",
            Some(request),
            None,
            self.retry.lightweight(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_fake_api;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn client(base: &str) -> PayPalRestClient {
        PayPalRestClient::new(Client::new(), "client".into(), "secret".into())
            .with_base_url(base)
            .with_retry(RetryPolicy::new(1, 1, 2))
    }

    #[tokio::test]
    async fn test_access_token_is_cached() {
        let token_calls = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/v1/oauth2/token",
                post(|State(calls): State<Arc<AtomicU32>>, headers: HeaderMap| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let expected = format!("Basic {}", STANDARD.encode("client:secret"));
                    assert_eq!(headers.get("authorization").unwrap().to_str().unwrap(), expected);
                    Json(json!({ "access_token": "A21AA", "token_type": "Bearer", "expires_in": 32400 }))
                }),
            )
            .route(
                "/v2/checkout/orders/:id",
                get(|Path(id): Path<String>, headers: HeaderMap| async move {
                    assert_eq!(headers.get("authorization").unwrap(), "Bearer A21AA");
                    Json(json!({ "id": id, "status": "COMPLETED", "purchase_units": [{ "custom_id": "8" }] }))
                }),
            )
            .with_state(token_calls.clone());
        let base = spawn_fake_api(router).await;
        let client = client(&base);

        let first = client.get_order("5O190127TN364715T").await.unwrap();
        let second = client.get_order("5O190127TN364715T").await.unwrap();

        assert_eq!(first.custom_id(), Some("8"));
        assert_eq!(second.id, "5O190127TN364715T");
        assert_eq!(token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let client = PayPalRestClient::new(Client::new(), String::new(), String::new());
        assert!(matches!(client.access_token().await, Err(ProviderError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_error_envelope_is_mapped() {
        let router = Router::new()
            .route(
                "/v1/oauth2/token",
                post(|| async { Json(json!({ "access_token": "tok", "expires_in": 3600 })) }),
            )
            .route(
                "/v2/checkout/orders/:id",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({ "name": "RESOURCE_NOT_FOUND", "message": "order not found", "debug_id": "abc" })),
                    )
                }),
            );
        let base = spawn_fake_api(router).await;

        let err = client(&base).get_order("missing").await.unwrap_err();
        match err {
            ProviderError::Api { kind, status, code, .. } => {
                assert_eq!(kind, ApiErrorKind::NotFound);
                assert_eq!(status, Some(404));
                assert_eq!(code.as_deref(), Some("abc"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
