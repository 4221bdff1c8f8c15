// Provider callback reconciliation: verify, filter, correlate, complete

use http::HeaderMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::orders::completion::{CompletionError, NotificationOutcome, OrderCompletionService};
use crate::orders::OrderNo;
use crate::providers::errors::WebhookError;
use crate::providers::{PaymentProvider, VerifiedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Authentic, but not an event type that completes an order.
    Ignored { event_type: String },
    Completed {
        order_no: OrderNo,
        notification: NotificationOutcome,
    },
}

pub struct WebhookReconciler {
    completion: Arc<OrderCompletionService>,
}

impl WebhookReconciler {
    pub fn new(completion: Arc<OrderCompletionService>) -> Self {
        Self { completion }
    }

    /// Nothing is mutated unless the payload authenticates against `provider`.
    #[instrument(skip_all, fields(provider = %provider.method()))]
    pub async fn handle(
        &self,
        provider: &dyn PaymentProvider,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let event = match provider.verify_webhook(payload, headers).await {
            Ok(event) => event,
            Err(e) => {
                if e.is_verification_failure() {
                    warn!(error = %e, "Rejected webhook: possible spoofed request");
                }
                return Err(e);
            }
        };

        if !event.kind.completes_order() {
            debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(ReconcileOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let order_reference = provider.resolve_order_reference(&event).await?.ok_or_else(|| {
            warn!(event_id = %event.id, event_type = %event.event_type, "Webhook event has no order reference");
            WebhookError::MissingReference(event.id.clone())
        })?;

        let verified = VerifiedEvent {
            provider: event.provider,
            kind: event.kind,
            order_reference,
        };
        info!(
            event_id = %event.id,
            provider = %verified.provider,
            order_no = verified.order_reference,
            kind = ?verified.kind,
            "Webhook event verified"
        );

        let outcome = self
            .completion
            .complete_order(verified.order_reference)
            .await
            .map_err(|e| match e {
                CompletionError::OrderNotFound(n) => WebhookError::OrderNotFound(n),
                CompletionError::Store(e) => WebhookError::ProcessingFailed(e.to_string()),
            })?;
        if !outcome.first_confirmation {
            debug!(order_no = outcome.order.order_no, "Redelivered event for a confirmed order");
        }

        Ok(ReconcileOutcome::Completed {
            order_no: outcome.order.order_no,
            notification: outcome.notification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ShopDatabase;
    use crate::orders::{NewOrder, Order, OrderStatus, PaymentMethod};
    use crate::settings::StripeSettings;
    use crate::stripe::rest::StripeRestClient;
    use crate::stripe::webhook::{sign_for_test, SIGNATURE_HEADER};
    use crate::stripe::StripeProvider;
    use crate::test_support::RecordingNotifier;
    use serde_json::json;

    const SECRET: &str = "whsec_reconcile";

    struct Fixture {
        db: ShopDatabase,
        notifier: Arc<RecordingNotifier>,
        provider: StripeProvider,
        reconciler: WebhookReconciler,
    }

    fn fixture(notifier: RecordingNotifier) -> Fixture {
        let db = ShopDatabase::in_memory().unwrap();
        let notifier = Arc::new(notifier);
        let completion = Arc::new(OrderCompletionService::new(db.clone(), notifier.clone()));
        let rest = StripeRestClient::new(reqwest::Client::new(), "sk_test".into()).with_base_url("http://127.0.0.1:9");
        let provider = StripeProvider::with_rest(
            StripeSettings {
                webhook_secret: SECRET.into(),
                ..StripeSettings::default()
            },
            rest,
            db.clone(),
        );
        Fixture {
            db,
            notifier,
            provider,
            reconciler: WebhookReconciler::new(completion),
        }
    }

    fn seed(db: &ShopDatabase) -> Order {
        db.insert_order(NewOrder {
            email: "renter@example.com".into(),
            cart_items: vec!["tt001".into(), "tt002".into()],
            payment_method: PaymentMethod::CardNetwork,
        })
        .unwrap()
    }

    fn signed(payload: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let sig = sign_for_test(payload, SECRET, chrono::Utc::now().timestamp());
        headers.insert(SIGNATURE_HEADER, sig.parse().unwrap());
        headers
    }

    fn session_completed(order_no: OrderNo) -> Vec<u8> {
        json!({
            "id": "evt_session",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_1", "client_reference_id": order_no.to_string(), "payment_status": "paid" } }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_checkout_completed_confirms_and_emails_once() {
        let f = fixture(RecordingNotifier::new());
        let order = seed(&f.db);
        let payload = session_completed(order.order_no);

        let first = f.reconciler.handle(&f.provider, &payload, &signed(&payload)).await.unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::Completed { order_no: order.order_no, notification: NotificationOutcome::Sent }
        );

        // Redelivery of the same event.
        let second = f.reconciler.handle(&f.provider, &payload, &signed(&payload)).await.unwrap();
        assert_eq!(
            second,
            ReconcileOutcome::Completed { order_no: order.order_no, notification: NotificationOutcome::AlreadySent }
        );

        let stored = f.db.get_order(order.order_no).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::PaymentConfirmed);
        assert_eq!(f.notifier.sent().len(), 1);
        assert_eq!(f.notifier.sent()[0].to, "renter@example.com");
    }

    #[tokio::test]
    async fn test_bad_signature_mutates_nothing() {
        let f = fixture(RecordingNotifier::new());
        let order = seed(&f.db);
        let payload = session_completed(order.order_no);

        let mut headers = HeaderMap::new();
        let forged = sign_for_test(&payload, "whsec_attacker", chrono::Utc::now().timestamp());
        headers.insert(SIGNATURE_HEADER, forged.parse().unwrap());

        let err = f.reconciler.handle(&f.provider, &payload, &headers).await.unwrap_err();
        assert!(err.is_verification_failure());

        let stored = f.db.get_order(order.order_no).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::PaymentInitiated);
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_irrelevant_event_is_ignored() {
        let f = fixture(RecordingNotifier::new());
        let order = seed(&f.db);
        let payload = json!({
            "id": "evt_refund",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1", "metadata": { "order_no": order.order_no.to_string() } } }
        })
        .to_string()
        .into_bytes();

        let outcome = f.reconciler.handle(&f.provider, &payload, &signed(&payload)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored { event_type: "charge.refunded".into() });
        assert_eq!(
            f.db.get_order(order.order_no).unwrap().unwrap().status,
            OrderStatus::PaymentInitiated
        );
    }

    #[tokio::test]
    async fn test_unknown_order_is_rejected() {
        let f = fixture(RecordingNotifier::new());
        let payload = session_completed(404);

        let err = f.reconciler.handle(&f.provider, &payload, &signed(&payload)).await.unwrap_err();
        assert!(matches!(err, WebhookError::OrderNotFound(404)));
        assert_eq!(f.db.order_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_reference_is_rejected() {
        let f = fixture(RecordingNotifier::new());
        let payload = json!({
            "id": "evt_sub",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_1", "description": "Subscription creation" } }
        })
        .to_string()
        .into_bytes();

        let err = f.reconciler.handle(&f.provider, &payload, &signed(&payload)).await.unwrap_err();
        assert!(matches!(err, WebhookError::MissingReference(_)));
    }

    #[tokio::test]
    async fn test_email_failure_still_confirms() {
        let f = fixture(RecordingNotifier::failing());
        let order = seed(&f.db);
        let payload = json!({
            "id": "evt_intent",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_2", "metadata": { "order_no": order.order_no.to_string() } } }
        })
        .to_string()
        .into_bytes();

        let outcome = f.reconciler.handle(&f.provider, &payload, &signed(&payload)).await.unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Completed { notification: NotificationOutcome::Failed(_), .. }
        ));
        assert_eq!(
            f.db.get_order(order.order_no).unwrap().unwrap().status,
            OrderStatus::PaymentConfirmed
        );
    }
}
