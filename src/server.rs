// HTTP surface: storefront checkout endpoints and provider webhooks

use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checkout::{CheckoutError, CheckoutRequest, CheckoutService, PaymentIntentResult};
use crate::database::ShopDatabase;
use crate::orders::{OrderNo, PaymentMethod};
use crate::providers::{PaymentProvider, ProviderSet};
use crate::webhook::{ReconcileOutcome, WebhookReconciler};

#[derive(Clone)]
pub struct AppState {
    pub db: ShopDatabase,
    pub providers: ProviderSet,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<WebhookReconciler>,
    /// Lowercase name of the header carrying the caller's verified email.
    pub user_email_header: Arc<str>,
}

/// Error body `{ "message": ... }` with the given status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

impl From<CheckoutError> for ApiError {
    fn from(e: CheckoutError) -> Self {
        match &e {
            CheckoutError::InvalidInput(_) => warn!(error = %e, "Checkout rejected"),
            _ => error!(error = %e, "Checkout failed"),
        }
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

/// Email of the caller, established by the authentication layer in front of this service.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(&*state.user_email_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Unauthenticated"))?;
        Ok(AuthenticatedUser(email.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    #[serde(default)]
    pub titles_rented: Vec<String>,
    #[serde(default)]
    pub redirect_success_url: String,
    #[serde(default)]
    pub redirect_cancel_url: String,
    #[serde(default)]
    pub redirect_success_no_checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentBody {
    #[serde(default)]
    pub titles_rented: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutResponse {
    checkout_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderNoResponse {
    order_no: OrderNo,
}

#[derive(Debug, Deserialize)]
struct OrderNoQuery {
    #[serde(rename = "orderId")]
    order_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/server/stripe/webhook", post(handle_stripe_webhook))
        .route("/server/paypal/webhook", post(handle_paypal_webhook))
        .route("/payments/:provider/create-checkout-session", post(create_checkout_session))
        .route("/payments/:provider/create-payment-intent", post(create_payment_intent))
        .route("/orders/get-order-no", get(get_order_no))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn run_server(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn provider_for(state: &AppState, slug: &str) -> Result<Arc<dyn PaymentProvider>, ApiError> {
    let method = PaymentMethod::from_slug(slug)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown payment provider: {slug}")))?;
    state.providers.get(method).ok_or_else(|| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Payment provider {method} is not configured"),
        )
    })
}

fn body_or_500<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(b)| b)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.body_text()))
}

async fn create_checkout_session(
    State(state): State<AppState>,
    AuthenticatedUser(email): AuthenticatedUser,
    Path(provider): Path<String>,
    body: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let provider = provider_for(&state, &provider)?;
    let body = body_or_500(body)?;

    let checkout_url = state
        .checkout
        .create_checkout(
            provider.as_ref(),
            CheckoutRequest {
                email: &email,
                cart_items: &body.titles_rented,
                success_url: &body.redirect_success_url,
                cancel_url: &body.redirect_cancel_url,
                success_no_checkout_url: body.redirect_success_no_checkout_url.as_deref(),
            },
        )
        .await?;

    Ok(Json(CheckoutResponse { checkout_url }))
}

async fn create_payment_intent(
    State(state): State<AppState>,
    AuthenticatedUser(email): AuthenticatedUser,
    Path(provider): Path<String>,
    body: Result<Json<PaymentIntentBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = provider_for(&state, &provider)?;
    let body = body_or_500(body)?;

    let result = state
        .checkout
        .create_payment_intent(provider.as_ref(), &email, &body.titles_rented)
        .await?;

    let response = match result {
        PaymentIntentResult::Pending { client_secret, order_id } => {
            json!({ "clientSecret": client_secret, "orderId": order_id })
        }
        PaymentIntentResult::SubscriptionActive { order_id } => {
            json!({ "orderId": order_id, "subscriptionActive": true })
        }
    };
    Ok(Json(response))
}

async fn get_order_no(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<OrderNoQuery>,
) -> Result<Json<OrderNoResponse>, ApiError> {
    let raw = query
        .order_id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Missing orderId"))?;
    let id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Malformed orderId: {raw}")))?;

    let order = state
        .db
        .get_order_by_id(&id)
        .map_err(|e| {
            error!(error = %e, "Order lookup failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?
        .ok_or_else(|| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Order {id} not found")))?;

    Ok(Json(OrderNoResponse { order_no: order.order_no }))
}

async fn handle_stripe_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    reconcile(&state, PaymentMethod::CardNetwork, &headers, &body).await
}

async fn handle_paypal_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    reconcile(&state, PaymentMethod::Wallet, &headers, &body).await
}

async fn reconcile(state: &AppState, method: PaymentMethod, headers: &HeaderMap, body: &[u8]) -> Response {
    let Some(provider) = state.providers.get(method) else {
        warn!(provider = %method, "Webhook received for unconfigured provider");
        return ApiError::new(StatusCode::BAD_REQUEST, format!("Payment provider {method} is not configured"))
            .into_response();
    };

    match state.reconciler.handle(provider.as_ref(), body, headers).await {
        Ok(ReconcileOutcome::Completed { order_no, notification }) => {
            info!(provider = %method, order_no, ?notification, "Webhook processed successfully");
            (StatusCode::OK, "OK").into_response()
        }
        Ok(ReconcileOutcome::Ignored { event_type }) => {
            info!(provider = %method, %event_type, "Webhook acknowledged without action");
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => {
            error!(provider = %method, "Webhook processing failed: {}", e);
            ApiError::new(StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
