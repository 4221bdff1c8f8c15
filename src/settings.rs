use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::paypal::rest::PAYPAL_API_BASE;
use crate::stripe::rest::STRIPE_API_BASE;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StripeSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub stripe_version: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_webhook_tolerance_seconds")]
    pub webhook_tolerance_seconds: i64,
    /// Price of a single DVD rental.
    #[serde(default)]
    pub price_id: String,
}

impl Default for StripeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_stripe_api_base(),
            stripe_version: String::new(),
            timeout_ms: default_provider_timeout_ms(),
            webhook_secret: String::new(),
            webhook_tolerance_seconds: default_webhook_tolerance_seconds(),
            price_id: String::new(),
        }
    }
}

impl StripeSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PayPalSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_paypal_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub webhook_id: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    /// Decimal price of a single rental, e.g. "3.00".
    #[serde(default = "default_rental_price")]
    pub rental_price: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for PayPalSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: default_paypal_api_base(),
            webhook_id: String::new(),
            timeout_ms: default_provider_timeout_ms(),
            rental_price: default_rental_price(),
            currency: default_currency(),
        }
    }
}

impl PayPalSettings {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MailSettings {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_smtp_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            password: String::new(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            timeout: default_smtp_timeout(),
        }
    }
}

impl MailSettings {
    pub fn is_configured(&self) -> bool {
        !self.address.is_empty() && !self.password.is_empty() && !self.smtp_host.is_empty()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub stripe: StripeSettings,
    #[serde(default)]
    pub paypal: PayPalSettings,
    #[serde(default)]
    pub mail: MailSettings,
    pub database_path: String,
    pub server_port: u16,
    /// Header carrying the email of the user authenticated upstream.
    pub user_email_header: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stripe: StripeSettings::default(),
            paypal: PayPalSettings::default(),
            mail: MailSettings::default(),
            database_path: "movie-shop.redb".to_string(),
            server_port: 8080,
            user_email_header: "x-user-email".to_string(),
        }
    }
}

impl Config {
    /// Load from config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: STRIPE_API_KEY, STRIPE_API_BASE, STRIPE_VERSION,
    /// STRIPE_TIMEOUT_MS, STRIPE_WEBHOOK_SECRET, STRIPE_WEBHOOK_TOLERANCE_SECONDS,
    /// DVD_RENT_PRICE_ID, PAYPAL_CLIENT_ID, PAYPAL_CLIENT_SECRET, PAYPAL_API_BASE,
    /// PAYPAL_WEBHOOK_ID, PAYPAL_TIMEOUT_MS, PAYPAL_RENTAL_PRICE, PAYPAL_CURRENCY,
    /// EMAIL_ADDRESS, EMAIL_PASSWORD, SMTP_HOST, SMTP_PORT, SMTP_TIMEOUT,
    /// DATABASE_PATH, SERVER_PORT, USER_EMAIL_HEADER
    pub fn load() -> Self {
        let base: Config = Default::default();
        let mut fig = Figment::from(Serialized::defaults(base));
        if std::path::Path::new("config.toml").exists() {
            fig = fig.merge(Toml::file("config.toml"));
        }
        let mut cfg: Config = fig.extract().unwrap_or_default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("STRIPE_API_KEY") {
            self.stripe.api_key = v;
        }
        if let Some(v) = var("STRIPE_API_BASE") {
            self.stripe.api_base = v;
        }
        if let Some(v) = var("STRIPE_VERSION") {
            self.stripe.stripe_version = v;
        }
        if let Some(v) = var("STRIPE_TIMEOUT_MS") {
            self.stripe.timeout_ms = v.parse().unwrap_or(self.stripe.timeout_ms);
        }
        if let Some(v) = var("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = v;
        }
        if let Some(v) = var("STRIPE_WEBHOOK_TOLERANCE_SECONDS") {
            self.stripe.webhook_tolerance_seconds = v.parse().unwrap_or(self.stripe.webhook_tolerance_seconds);
        }
        if let Some(v) = var("DVD_RENT_PRICE_ID") {
            self.stripe.price_id = v;
        }

        if let Some(v) = var("PAYPAL_CLIENT_ID") {
            self.paypal.client_id = v;
        }
        if let Some(v) = var("PAYPAL_CLIENT_SECRET") {
            self.paypal.client_secret = v;
        }
        if let Some(v) = var("PAYPAL_API_BASE") {
            self.paypal.api_base = v;
        }
        if let Some(v) = var("PAYPAL_WEBHOOK_ID") {
            self.paypal.webhook_id = v;
        }
        if let Some(v) = var("PAYPAL_TIMEOUT_MS") {
            self.paypal.timeout_ms = v.parse().unwrap_or(self.paypal.timeout_ms);
        }
        if let Some(v) = var("PAYPAL_RENTAL_PRICE") {
            self.paypal.rental_price = v;
        }
        if let Some(v) = var("PAYPAL_CURRENCY") {
            self.paypal.currency = v;
        }

        if let Some(v) = var("EMAIL_ADDRESS") {
            self.mail.address = v;
        }
        if let Some(v) = var("EMAIL_PASSWORD") {
            self.mail.password = v;
        }
        if let Some(v) = var("SMTP_HOST") {
            self.mail.smtp_host = v;
        }
        if let Some(v) = var("SMTP_PORT") {
            self.mail.smtp_port = v.parse().unwrap_or(self.mail.smtp_port);
        }
        if let Some(v) = var("SMTP_TIMEOUT") {
            self.mail.timeout = parse_duration_env(&v, self.mail.timeout);
        }

        if let Some(v) = var("DATABASE_PATH") {
            self.database_path = v;
        }
        if let Some(v) = var("SERVER_PORT") {
            self.server_port = v.parse().unwrap_or(self.server_port);
        }
        if let Some(v) = var("USER_EMAIL_HEADER") {
            self.user_email_header = v.to_ascii_lowercase();
        }
    }
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_stripe_api_base() -> String {
    STRIPE_API_BASE.to_string()
}

fn default_paypal_api_base() -> String {
    PAYPAL_API_BASE.to_string()
}

fn default_provider_timeout_ms() -> u64 {
    15_000
}

fn default_webhook_tolerance_seconds() -> i64 {
    300 // 5 minutes
}

fn default_rental_price() -> String {
    "3.00".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_smtp_host() -> String {
    "smtp.mail.yahoo.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_smtp_timeout() -> Duration {
    Duration::from_secs(10)
}
