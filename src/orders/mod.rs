// Rental orders, payment customers and the services that move them through their lifecycle

pub mod completion;
pub mod customers;
pub mod template;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Public correlation token threaded through provider metadata.
pub type OrderNo = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "Payment Initiated")]
    PaymentInitiated,
    #[serde(rename = "Payment Confirmed")]
    PaymentConfirmed,
}

/// Which provider adapter owns an order's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "STRIPE")]
    CardNetwork,
    #[serde(rename = "PAYPAL")]
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CardNetwork => "stripe",
            PaymentMethod::Wallet => "paypal",
        }
    }

    /// Inverse of [`PaymentMethod::as_str`], used for route segments.
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "stripe" => Some(PaymentMethod::CardNetwork),
            "paypal" => Some(PaymentMethod::Wallet),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_no: OrderNo,
    pub email: String,
    pub cart_items: Vec<String>,
    pub created: DateTime<Utc>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// First transition to `PaymentConfirmed`; never overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<DateTime<Utc>>,
    /// First successful confirmation email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_confirmed(&self) -> bool {
        self.status == OrderStatus::PaymentConfirmed
    }
}

/// Fields supplied by the caller when an order is created; id, number and
/// timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub email: String,
    pub cart_items: Vec<String>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCustomer {
    pub email: String,
    pub external_customer_id: String,
    pub created: DateTime<Utc>,
}
