// Order completion: the single status transition shared by the webhook path and
// subscription checkouts, followed by a best-effort confirmation email

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::database::{ShopDatabase, StoreError};
use crate::notifier::Notifier;
use crate::orders::template::render_order_confirmation;
use crate::orders::{Order, OrderNo};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("order {0} not found")]
    OrderNotFound(OrderNo),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent,
    /// A confirmation email was already delivered for this order.
    AlreadySent,
    /// Delivery failed; the confirmed status stands.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub order: Order,
    pub first_confirmation: bool,
    pub notification: NotificationOutcome,
}

pub struct OrderCompletionService {
    db: ShopDatabase,
    notifier: Arc<dyn Notifier>,
}

impl OrderCompletionService {
    pub fn new(db: ShopDatabase, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Mark the order `PaymentConfirmed` and send the confirmation email.
    ///
    /// Safe to call repeatedly for the same order: the status write is an
    /// unconditional set and the email is skipped once it has been delivered.
    /// Two concurrent first deliveries can still both send.
    #[instrument(skip(self))]
    pub async fn complete_order(&self, order_no: OrderNo) -> Result<CompletionOutcome, CompletionError> {
        let confirmed = self.db.confirm_order(order_no)?.ok_or_else(|| {
            warn!(order_no, "Complete order failed: order not found");
            CompletionError::OrderNotFound(order_no)
        })?;

        let order = confirmed.order;
        if confirmed.first_confirmation {
            info!(order_no, email = %order.email, "Order payment confirmed");
        } else {
            debug!(order_no, "Order already confirmed; status re-applied");
        }

        let notification = if order.notified.is_some() {
            debug!(order_no, "Confirmation email already sent; skipping");
            NotificationOutcome::AlreadySent
        } else {
            self.notify(&order).await
        };

        Ok(CompletionOutcome {
            order,
            first_confirmation: confirmed.first_confirmation,
            notification,
        })
    }

    async fn notify(&self, order: &Order) -> NotificationOutcome {
        let email = render_order_confirmation(order);
        match self.notifier.send(&email).await {
            Ok(()) => {
                if let Err(e) = self.db.mark_notified(order.order_no) {
                    warn!(order_no = order.order_no, error = %e, "Failed to record notification");
                }
                NotificationOutcome::Sent
            }
            Err(e) => {
                warn!(
                    order_no = order.order_no,
                    error = %e,
                    "Send email failed; order stays confirmed"
                );
                NotificationOutcome::Failed(e.to_string())
            }
        }
    }
}
