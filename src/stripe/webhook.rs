// Stripe webhook signature verification and order-reference extraction

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::orders::{OrderNo, PaymentMethod};
use crate::providers::errors::WebhookError;
use crate::providers::{parse_order_reference, EventKind, ProviderEvent};
use crate::stripe::types::StripeEvent;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verify the `Stripe-Signature` header against the raw request body.
pub fn verify_signature(
    payload: &[u8],
    headers: &http::HeaderMap,
    webhook_secret: &str,
    tolerance_seconds: i64,
) -> Result<(), WebhookError> {
    verify_signature_at(payload, headers, webhook_secret, tolerance_seconds, Utc::now().timestamp())
}

pub fn verify_signature_at(
    payload: &[u8],
    headers: &http::HeaderMap,
    webhook_secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), WebhookError> {
    if webhook_secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }

    let signature_header = headers
        .get(SIGNATURE_HEADER)
        .ok_or(WebhookError::MissingSignature(SIGNATURE_HEADER))?
        .to_str()
        .map_err(|e| WebhookError::InvalidSignature(format!("Invalid header encoding: {}", e)))?;

    // t=timestamp,v1=signature[,v1=signature2,...]
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp_raw = timestamp.ok_or_else(|| {
        WebhookError::InvalidSignature("Missing timestamp in signature header".to_string())
    })?;
    let timestamp: i64 = timestamp_raw
        .parse()
        .map_err(|_| WebhookError::InvalidSignature(format!("Malformed timestamp: {timestamp_raw}")))?;

    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature("No v1 signature found".to_string()));
    }

    // abs_diff cannot overflow on hostile timestamps
    let time_diff = now.abs_diff(timestamp);
    if time_diff > tolerance_seconds.max(0).unsigned_abs() {
        return Err(WebhookError::TimestampTolerance(format!(
            "Timestamp {} differs from current time {} by {} seconds (tolerance: {})",
            timestamp, now, time_diff, tolerance_seconds
        )));
    }

    // Signed payload is "<timestamp>.<raw body bytes>"
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(format!("HMAC init error: {}", e)))?;
    mac.update(timestamp_raw.as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice compares in constant time
    let signature_valid = signatures.iter().any(|sig| match hex::decode(sig) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    });

    if !signature_valid {
        return Err(WebhookError::InvalidSignature(
            "No signature matches the expected signature for the payload".to_string(),
        ));
    }

    debug!(timestamp, time_diff, "Webhook signature verified successfully");
    Ok(())
}

pub fn parse_event(payload: &[u8]) -> Result<ProviderEvent, WebhookError> {
    let evt: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::MalformedPayload(format!("JSON parse error: {}", e)))?;

    let kind = match evt.event_type.as_str() {
        // Delayed payment methods complete the session before funds arrive.
        "checkout.session.completed"
            if evt.data.object.get("payment_status").and_then(|v| v.as_str()) == Some("unpaid") =>
        {
            EventKind::Other("checkout.session.completed:unpaid".to_string())
        }
        "checkout.session.completed" => EventKind::CheckoutCompleted,
        "payment_intent.succeeded" => EventKind::PaymentSucceeded,
        other => EventKind::Other(other.to_string()),
    };

    Ok(ProviderEvent {
        provider: PaymentMethod::CardNetwork,
        id: evt.id,
        event_type: evt.event_type,
        kind,
        object: evt.data.object,
    })
}

/// Checkout sessions carry the order number in `client_reference_id`; payment
/// intents in `metadata.order_no`, or in `description` for older intents.
pub fn extract_order_reference(event: &ProviderEvent) -> Option<OrderNo> {
    let object = &event.object;
    let metadata_ref = || {
        object
            .get("metadata")
            .and_then(|m| m.get("order_no"))
            .and_then(|v| v.as_str())
            .and_then(parse_order_reference)
    };

    match event.kind {
        EventKind::CheckoutCompleted => object
            .get("client_reference_id")
            .and_then(|v| v.as_str())
            .and_then(parse_order_reference)
            .or_else(metadata_ref),
        EventKind::PaymentSucceeded => metadata_ref().or_else(|| {
            object
                .get("description")
                .and_then(|v| v.as_str())
                .and_then(parse_order_reference)
        }),
        EventKind::Other(_) => None,
    }
}

#[cfg(test)]
pub(crate) fn sign_for_test(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
