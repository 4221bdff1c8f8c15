// Provider error types shared by the Stripe and PayPal adapters

use thiserror::Error;

/// Provider-side error category, parsed from the provider's error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    ApiConnection,
    Api,
    Authentication,
    Card,
    Idempotency,
    InvalidRequest,
    NotFound,
    RateLimit,
    Validation,
    Unknown,
}

impl ApiErrorKind {
    /// Stripe `error.type` values.
    pub fn from_stripe(s: &str) -> Self {
        match s {
            "api_connection_error" => ApiErrorKind::ApiConnection,
            "api_error" => ApiErrorKind::Api,
            "authentication_error" => ApiErrorKind::Authentication,
            "card_error" => ApiErrorKind::Card,
            "idempotency_error" => ApiErrorKind::Idempotency,
            "invalid_request_error" => ApiErrorKind::InvalidRequest,
            "rate_limit_error" => ApiErrorKind::RateLimit,
            "validation_error" => ApiErrorKind::Validation,
            _ => ApiErrorKind::Unknown,
        }
    }

    /// PayPal error `name` values.
    pub fn from_paypal(s: &str) -> Self {
        match s {
            "INTERNAL_SERVER_ERROR" | "SERVICE_UNAVAILABLE" => ApiErrorKind::Api,
            "AUTHENTICATION_FAILURE" | "NOT_AUTHORIZED" | "invalid_client" => {
                ApiErrorKind::Authentication
            }
            "INVALID_REQUEST" | "MALFORMED_REQUEST" => ApiErrorKind::InvalidRequest,
            "UNPROCESSABLE_ENTITY" | "VALIDATION_ERROR" => ApiErrorKind::Validation,
            "RESOURCE_NOT_FOUND" => ApiErrorKind::NotFound,
            "RATE_LIMIT_REACHED" => ApiErrorKind::RateLimit,
            _ => ApiErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{provider} error: {kind:?} status={status:?} code={code:?} message={message:?}")]
    Api {
        provider: &'static str,
        kind: ApiErrorKind,
        message: Option<String>,
        code: Option<String>,
        status: Option<u16>,
    },
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("store error: {0}")]
    Store(#[from] crate::database::StoreError),
}

impl ProviderError {
    /// Connection failures, 5xx responses and rate limits are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(_) | ProviderError::Transient(_) => true,
            ProviderError::Api { kind, status, .. } => is_transient(*status, Some(kind)),
            _ => false,
        }
    }
}

pub fn is_transient(http_status: Option<u16>, kind: Option<&ApiErrorKind>) -> bool {
    if let Some(s) = http_status {
        if (500..600).contains(&s) || s == 429 {
            return true;
        }
    }
    matches!(
        kind,
        Some(ApiErrorKind::ApiConnection | ApiErrorKind::Api | ApiErrorKind::RateLimit)
    )
}

// Webhook-specific errors
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing webhook secret")]
    MissingSecret,
    #[error("missing signature header: {0}")]
    MissingSignature(&'static str),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("timestamp tolerance exceeded: {0}")]
    TimestampTolerance(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("verification call failed: {0}")]
    VerificationUnavailable(String),
    #[error("missing order reference: {0}")]
    MissingReference(String),
    #[error("order {0} not found")]
    OrderNotFound(u64),
    #[error("event processing failed: {0}")]
    ProcessingFailed(String),
}

impl WebhookError {
    /// Authenticity could not be established; no state was touched.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSecret
                | WebhookError::MissingSignature(_)
                | WebhookError::InvalidSignature(_)
                | WebhookError::TimestampTolerance(_)
                | WebhookError::VerificationUnavailable(_)
        )
    }
}
