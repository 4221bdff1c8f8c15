mod checkout;
mod database;
mod notifier;
mod orders;
mod paypal;
mod providers;
mod server;
mod settings;
mod stripe;
mod webhook;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::checkout::CheckoutService;
use crate::database::ShopDatabase;
use crate::notifier::{DisabledNotifier, Notifier, SmtpNotifier};
use crate::orders::completion::OrderCompletionService;
use crate::paypal::PayPalProvider;
use crate::providers::ProviderSet;
use crate::server::AppState;
use crate::stripe::StripeProvider;
use crate::webhook::WebhookReconciler;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = settings::Config::load();
    tracing::info!("Starting movie shop payments backend");

    let db = ShopDatabase::new(&cfg.database_path)
        .with_context(|| format!("opening database at {}", cfg.database_path))?;

    let mut providers = ProviderSet::new();
    if cfg.stripe.is_configured() {
        if cfg.stripe.webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set; Stripe webhooks will be rejected");
        }
        providers = providers.with(Arc::new(StripeProvider::new(cfg.stripe.clone(), db.clone())?));
        tracing::info!("Stripe provider enabled");
    } else {
        tracing::warn!("STRIPE_API_KEY not set; Stripe provider disabled");
    }
    if cfg.paypal.is_configured() {
        if cfg.paypal.webhook_id.is_empty() {
            tracing::warn!("PAYPAL_WEBHOOK_ID not set; PayPal webhooks will be rejected");
        }
        providers = providers.with(Arc::new(PayPalProvider::new(cfg.paypal.clone(), db.clone())?));
        tracing::info!("PayPal provider enabled");
    } else {
        tracing::warn!("PAYPAL_CLIENT_ID/PAYPAL_CLIENT_SECRET not set; PayPal provider disabled");
    }
    if providers.is_empty() {
        tracing::error!("No payment provider configured; exiting");
        return Ok(());
    }

    let notifier: Arc<dyn Notifier> = match SmtpNotifier::new(&cfg.mail) {
        Ok(smtp) => Arc::new(smtp),
        Err(e) => {
            tracing::warn!(error = %e, "Confirmation emails disabled");
            Arc::new(DisabledNotifier)
        }
    };

    let completion = Arc::new(OrderCompletionService::new(db.clone(), notifier));
    let state = AppState {
        checkout: Arc::new(CheckoutService::new(db.clone(), completion.clone())),
        reconciler: Arc::new(WebhookReconciler::new(completion)),
        providers,
        user_email_header: Arc::from(cfg.user_email_header.as_str()),
        db,
    };

    server::run_server(cfg.server_port, state).await
}
