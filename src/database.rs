//! Embedded persistence for orders, the order-number sequence and payment customers
//!
//! Uses redb. Every mutation is a single write transaction; redb serializes
//! writers, which is what makes the sequence increment, the customer
//! unique-key check and the status transition atomic under concurrent requests.

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::orders::{NewOrder, Order, OrderNo, OrderStatus, PaymentCustomer};

/// Key: order number. Value: serialized `Order` JSON.
const ORDERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("orders");

/// Key: order id (UUID string). Value: order number.
const ORDER_IDS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("order_ids");

/// Key: sequence name. Value: last assigned number.
const SEQUENCES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Key: customer email. Value: serialized `PaymentCustomer` JSON.
const PAYMENT_CUSTOMERS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("payment_customers");

/// Key: customer email. Value: PayPal billing subscription id.
const PAYPAL_SUBSCRIPTIONS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("paypal_subscriptions");

const ORDER_NO_SEQUENCE: &str = "order_no";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
}

macro_rules! redb_error_into_store {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Database(e.into())
                }
            }
        )*
    };
}

redb_error_into_store!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Result of a status transition.
#[derive(Debug, Clone)]
pub struct ConfirmedOrder {
    pub order: Order,
    /// False when the order was already `PaymentConfirmed` before this call.
    pub first_confirmation: bool,
}

#[derive(Clone)]
pub struct ShopDatabase {
    db: Arc<Database>,
}

impl ShopDatabase {
    /// Create a new database instance or open an existing one
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)?;
        Self::init(db)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, StoreError> {
        let write_txn = db.begin_write()?;
        {
            let _orders = write_txn.open_table(ORDERS_TABLE)?;
            let _ids = write_txn.open_table(ORDER_IDS_TABLE)?;
            let _sequences = write_txn.open_table(SEQUENCES_TABLE)?;
            let _customers = write_txn.open_table(PAYMENT_CUSTOMERS_TABLE)?;
            let _subscriptions = write_txn.open_table(PAYPAL_SUBSCRIPTIONS_TABLE)?;
        }
        write_txn.commit()?;

        tracing::info!("Database initialized with orders, sequences, payment_customers and paypal_subscriptions tables");

        Ok(Self { db: Arc::new(db) })
    }

    /// Persist a new order in `PaymentInitiated`, assigning the next order number.
    pub fn insert_order(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        let write_txn = self.db.begin_write()?;
        let order = {
            let mut sequences = write_txn.open_table(SEQUENCES_TABLE)?;
            let order_no = sequences
                .get(ORDER_NO_SEQUENCE)?
                .map(|v| v.value())
                .unwrap_or(0)
                + 1;
            sequences.insert(ORDER_NO_SEQUENCE, order_no)?;

            let order = Order {
                id: Uuid::new_v4(),
                order_no,
                email: new_order.email,
                cart_items: new_order.cart_items,
                created: Utc::now(),
                status: OrderStatus::PaymentInitiated,
                payment_method: new_order.payment_method,
                confirmed: None,
                notified: None,
            };

            let mut orders = write_txn.open_table(ORDERS_TABLE)?;
            let value = serde_json::to_vec(&order)?;
            orders.insert(order_no, value.as_slice())?;

            let mut ids = write_txn.open_table(ORDER_IDS_TABLE)?;
            ids.insert(order.id.to_string().as_str(), order_no)?;

            order
        };
        write_txn.commit()?;

        tracing::debug!(
            order_no = order.order_no,
            order_id = %order.id,
            payment_method = %order.payment_method,
            "Inserted order"
        );
        Ok(order)
    }

    pub fn get_order(&self, order_no: OrderNo) -> Result<Option<Order>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let result = table.get(order_no)?;
        match result {
            Some(curr) => Ok(Some(serde_json::from_slice(curr.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_order_by_id(&self, id: &Uuid) -> Result<Option<Order>, StoreError> {
        let order_no = {
            let read_txn = self.db.begin_read()?;
            let ids = read_txn.open_table(ORDER_IDS_TABLE)?;
            let found = ids.get(id.to_string().as_str())?.map(|v| v.value());
            found
        };
        match order_no {
            Some(order_no) => self.get_order(order_no),
            None => Ok(None),
        }
    }

    /// Set `PaymentConfirmed` unconditionally. Returns `None` if the order does not exist.
    pub fn confirm_order(&self, order_no: OrderNo) -> Result<Option<ConfirmedOrder>, StoreError> {
        self.update_order(order_no, |order| {
            let first_confirmation = !order.is_confirmed();
            order.status = OrderStatus::PaymentConfirmed;
            if order.confirmed.is_none() {
                order.confirmed = Some(Utc::now());
            }
            first_confirmation
        })
        .map(|updated| {
            updated.map(|(order, first_confirmation)| ConfirmedOrder {
                order,
                first_confirmation,
            })
        })
    }

    /// Record the first successful confirmation email.
    pub fn mark_notified(&self, order_no: OrderNo) -> Result<Option<Order>, StoreError> {
        self.update_order(order_no, |order| {
            if order.notified.is_none() {
                order.notified = Some(Utc::now());
            }
        })
        .map(|updated| updated.map(|(order, _)| order))
    }

    fn update_order<F, R>(&self, order_no: OrderNo, apply: F) -> Result<Option<(Order, R)>, StoreError>
    where
        F: FnOnce(&mut Order) -> R,
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut orders = write_txn.open_table(ORDERS_TABLE)?;
            let existing: Option<Order> = orders
                .get(order_no)?
                .map(|v| serde_json::from_slice(v.value()))
                .transpose()?;

            match existing {
                Some(mut order) => {
                    let result = apply(&mut order);
                    let value = serde_json::to_vec(&order)?;
                    orders.insert(order_no, value.as_slice())?;
                    Some((order, result))
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    #[cfg(test)]
    pub fn order_count(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        let count = table.iter()?.count();
        Ok(count)
    }

    pub fn get_payment_customer(&self, email: &str) -> Result<Option<PaymentCustomer>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PAYMENT_CUSTOMERS_TABLE)?;

        let result = table.get(email)?;
        match result {
            Some(curr) => Ok(Some(serde_json::from_slice(curr.value())?)),
            None => Ok(None),
        }
    }

    /// Insert a customer mapping; fails with `DuplicateKey` if the email is already mapped.
    pub fn insert_payment_customer(&self, customer: &PaymentCustomer) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        let duplicate = {
            let mut table = write_txn.open_table(PAYMENT_CUSTOMERS_TABLE)?;
            let exists = table.get(customer.email.as_str())?.is_some();
            if !exists {
                let value = serde_json::to_vec(customer)?;
                table.insert(customer.email.as_str(), value.as_slice())?;
            }
            exists
        };

        if duplicate {
            write_txn.abort()?;
            return Err(StoreError::DuplicateKey(customer.email.clone()));
        }
        write_txn.commit()?;

        tracing::debug!(email = %customer.email, "Inserted payment customer");
        Ok(())
    }

    /// PayPal subscription the buyer signed up with, if any.
    pub fn get_paypal_subscription(&self, email: &str) -> Result<Option<String>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PAYPAL_SUBSCRIPTIONS_TABLE)?;
        let found = table.get(email)?.map(|v| v.value().to_string());
        Ok(found)
    }

    // Rows come from the subscription signup flow; this service only reads them.
    #[cfg(test)]
    pub fn set_paypal_subscription(&self, email: &str, subscription_id: &str) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PAYPAL_SUBSCRIPTIONS_TABLE)?;
            table.insert(email, subscription_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn payment_customer_count(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PAYMENT_CUSTOMERS_TABLE)?;
        let count = table.iter()?.count();
        Ok(count)
    }
}
