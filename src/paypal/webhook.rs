// PayPal webhook parsing; authenticity is established remotely through the
// verify-webhook-signature API with the transmission headers forwarded verbatim

use serde_json::value::RawValue;

use crate::orders::PaymentMethod;
use crate::paypal::types::{PayPalWebhookEvent, VerifyWebhookSignatureRequest};
use crate::providers::errors::WebhookError;
use crate::providers::{EventKind, ProviderEvent};

pub const TRANSMISSION_ID: &str = "paypal-transmission-id";
pub const TRANSMISSION_TIME: &str = "paypal-transmission-time";
pub const CERT_URL: &str = "paypal-cert-url";
pub const AUTH_ALGO: &str = "paypal-auth-algo";
pub const TRANSMISSION_SIG: &str = "paypal-transmission-sig";

pub const VERIFICATION_SUCCESS: &str = "SUCCESS";

fn required_header(headers: &http::HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    let value = headers.get(name).ok_or(WebhookError::MissingSignature(name))?;
    let value = value
        .to_str()
        .map_err(|e| WebhookError::InvalidSignature(format!("Invalid {name} encoding: {e}")))?;
    if value.is_empty() {
        return Err(WebhookError::MissingSignature(name));
    }
    Ok(value.to_string())
}

pub fn build_verification_request(
    headers: &http::HeaderMap,
    webhook_id: &str,
    webhook_event: Box<RawValue>,
) -> Result<VerifyWebhookSignatureRequest, WebhookError> {
    if webhook_id.is_empty() {
        return Err(WebhookError::MissingSecret);
    }

    Ok(VerifyWebhookSignatureRequest {
        auth_algo: required_header(headers, AUTH_ALGO)?,
        cert_url: required_header(headers, CERT_URL)?,
        transmission_id: required_header(headers, TRANSMISSION_ID)?,
        transmission_sig: required_header(headers, TRANSMISSION_SIG)?,
        transmission_time: required_header(headers, TRANSMISSION_TIME)?,
        webhook_id: webhook_id.to_string(),
        webhook_event,
    })
}

/// Checks the body is JSON without re-encoding it.
pub fn parse_payload(payload: &[u8]) -> Result<Box<RawValue>, WebhookError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| WebhookError::MalformedPayload(format!("Invalid UTF-8: {}", e)))?;
    serde_json::from_str(text)
        .map_err(|e| WebhookError::MalformedPayload(format!("JSON parse error: {}", e)))
}

pub fn to_provider_event(raw: &RawValue) -> Result<ProviderEvent, WebhookError> {
    let evt: PayPalWebhookEvent = serde_json::from_str(raw.get())
        .map_err(|e| WebhookError::MalformedPayload(format!("Unexpected event shape: {}", e)))?;

    let kind = match evt.event_type.as_str() {
        "CHECKOUT.ORDER.COMPLETED" => EventKind::CheckoutCompleted,
        "PAYMENT.CAPTURE.COMPLETED" => EventKind::PaymentSucceeded,
        other => EventKind::Other(other.to_string()),
    };

    Ok(ProviderEvent {
        provider: PaymentMethod::Wallet,
        id: evt.id,
        event_type: evt.event_type,
        kind,
        object: evt.resource,
    })
}

/// PayPal-side order id carried by the event resource.
pub fn provider_order_id(event: &ProviderEvent) -> Option<&str> {
    match event.kind {
        EventKind::CheckoutCompleted => event.object.get("id").and_then(|v| v.as_str()),
        EventKind::PaymentSucceeded => event
            .object
            .get("supplementary_data")
            .and_then(|v| v.get("related_ids"))
            .and_then(|v| v.get("order_id"))
            .and_then(|v| v.as_str()),
        EventKind::Other(_) => None,
    }
}

#[cfg(test)]
pub(crate) fn signed_headers() -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    headers.insert(TRANSMISSION_ID, "69cd13f0-d67a-11e5-baa3-778b53f4ae55".parse().unwrap());
    headers.insert(TRANSMISSION_TIME, "2016-02-18T20:01:35Z".parse().unwrap());
    headers.insert(CERT_URL, "https://api.paypal.com/v1/notifications/certs/CERT-360caa42".parse().unwrap());
    headers.insert(AUTH_ALGO, "SHA256withRSA".parse().unwrap());
    headers.insert(TRANSMISSION_SIG, "lmI95Jx3Y9nhR5SJWlHVIWpg4AgFk7n9bCHSRxbrd8A9zrhdu2rMyFrmz+Zjh3s3boXB07VXCXUZy/UFzUlnGJn0wDugt7FlSvdKeIJenLRemUxYCPVoEZzg9VFNqOa48gMkvF+XTpxBeUx/kWy6B5cp7GkT2+pOowfRK7OaynuxUoKW3JcMWw272VKjLTtTAShncla7tGF+55rxyt2KNZIIqxNMJ48RDZheGU5w1npu9dZHnPgTXB9iomeVRoD8O/jhRpnKsGrDschyNdkeh81BJJMH4Ctc6lnCCquoP/GzCzz33MMsNdid7vL/NIWaCsekQpW26FpWPi/tfj8nLA==".parse().unwrap());
    headers
}

#[cfg(test)]
pub(crate) fn raw_event(value: serde_json::Value) -> Box<RawValue> {
    RawValue::from_string(value.to_string()).unwrap()
}
