// Minimal PayPal REST DTOs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::providers::errors::{ApiErrorKind, ProviderError};

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Seconds until expiry.
    #[serde(default)]
    pub expires_in: u64,
}

// REST errors: { name, message, debug_id }; OAuth errors: { error, error_description }
#[derive(Debug, Clone, Deserialize)]
pub struct PayPalErrorEnvelope {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub debug_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl PayPalErrorEnvelope {
    pub fn into_provider_error(self, status: Option<u16>) -> ProviderError {
        let name = self.name.or(self.error).unwrap_or_default();
        ProviderError::Api {
            provider: "paypal",
            kind: ApiErrorKind::from_paypal(&name),
            message: self.message.or(self.error_description),
            code: self.debug_id,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub intent: &'static str,
    pub purchase_units: Vec<PurchaseUnitRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_context: Option<ApplicationContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseUnitRequest {
    pub reference_id: String,
    pub custom_id: String,
    pub description: String,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub currency_code: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationContext {
    pub brand_name: String,
    pub return_url: String,
    pub cancel_url: String,
    pub user_action: &'static str,
    pub shipping_preference: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalOrder {
    pub id: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnit>,
}

impl PayPalOrder {
    /// Buyer-facing approval link.
    pub fn approve_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.as_str())
    }

    pub fn custom_id(&self) -> Option<&str> {
        self.purchase_units.first()?.custom_id.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseUnit {
    #[serde(default)]
    pub custom_id: Option<String>,
}

pub const SUBSCRIPTION_ACTIVE: &str = "ACTIVE";

/// Billing subscription, as returned by `GET /v1/billing/subscriptions/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PayPalSubscription {
    pub status: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub billing_info: Option<BillingInfo>,
}

impl PayPalSubscription {
    /// Plan id and next billing time, only for an active subscription that has both.
    pub fn active_plan(&self) -> Option<(&str, DateTime<Utc>)> {
        if self.status != SUBSCRIPTION_ACTIVE {
            return None;
        }
        let next_billing_time = self.billing_info.as_ref()?.next_billing_time?;
        let plan_id = self.plan_id.as_deref().filter(|id| !id.is_empty())?;
        Some((plan_id, next_billing_time))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingInfo {
    #[serde(default)]
    pub next_billing_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalPlan {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyWebhookSignatureRequest {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
    pub webhook_id: String,
    /// The event exactly as received; PayPal checks it against the transmission signature.
    pub webhook_event: Box<RawValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyWebhookSignatureResponse {
    pub verification_status: String,
}

/// PayPal webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct PayPalWebhookEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
}
