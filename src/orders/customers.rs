// Payment customer registry: one provider-side customer per user email

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::database::{ShopDatabase, StoreError};
use crate::orders::PaymentCustomer;
use crate::providers::errors::ProviderError;

#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("create payment customer failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("payment customer store error: {0}")]
    Store(#[from] StoreError),
}

/// Mints customer handles on the provider side.
#[async_trait]
pub trait CustomerProvider: Send + Sync {
    async fn create_customer(&self, email: &str) -> Result<String, ProviderError>;
}

pub struct CustomerRegistry {
    db: ShopDatabase,
    provider: Arc<dyn CustomerProvider>,
}

impl CustomerRegistry {
    pub fn new(db: ShopDatabase, provider: Arc<dyn CustomerProvider>) -> Self {
        Self { db, provider }
    }

    /// Find the customer for `email`, minting and persisting one if absent.
    ///
    /// When a concurrent request persisted first, the stored record wins and
    /// is returned instead of the handle minted here.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, email: &str) -> Result<PaymentCustomer, CustomerError> {
        if let Some(existing) = self.db.get_payment_customer(email)? {
            return Ok(existing);
        }

        let external_customer_id = self.provider.create_customer(email).await?;
        let customer = PaymentCustomer {
            email: email.to_string(),
            external_customer_id,
            created: Utc::now(),
        };

        match self.db.insert_payment_customer(&customer) {
            Ok(()) => {
                info!(
                    email = %email,
                    customer_id = %customer.external_customer_id,
                    "Created payment customer"
                );
                Ok(customer)
            }
            Err(StoreError::DuplicateKey(_)) => {
                debug!(email = %email, "Payment customer created concurrently; re-reading");
                self.db
                    .get_payment_customer(email)?
                    .ok_or(CustomerError::Store(StoreError::DuplicateKey(email.to_string())))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Barrier;

    struct CountingProvider {
        minted: AtomicU32,
        barrier: Option<Barrier>,
    }

    impl CountingProvider {
        fn new(barrier: Option<Barrier>) -> Self {
            Self {
                minted: AtomicU32::new(0),
                barrier,
            }
        }
    }

    #[async_trait]
    impl CustomerProvider for CountingProvider {
        async fn create_customer(&self, _email: &str) -> Result<String, ProviderError> {
            let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            Ok(format!("cus_{n}"))
        }
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_existing() {
        let db = ShopDatabase::in_memory().unwrap();
        let provider = Arc::new(CountingProvider::new(None));
        let registry = CustomerRegistry::new(db.clone(), provider.clone());

        let first = registry.get_or_create("a@example.com").await.unwrap();
        let second = registry.get_or_create("a@example.com").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.minted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_persist_one_customer() {
        let db = ShopDatabase::in_memory().unwrap();
        // Both requests pass the lookup and mint before either persists.
        let provider = Arc::new(CountingProvider::new(Some(Barrier::new(2))));
        let registry = CustomerRegistry::new(db.clone(), provider.clone());

        let (a, b) = tokio::join!(
            registry.get_or_create("a@example.com"),
            registry.get_or_create("a@example.com")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(provider.minted.load(Ordering::SeqCst), 2);
        assert_eq!(a.external_customer_id, b.external_customer_id);
        assert_eq!(db.payment_customer_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        struct Down;
        #[async_trait]
        impl CustomerProvider for Down {
            async fn create_customer(&self, _email: &str) -> Result<String, ProviderError> {
                Err(ProviderError::Http("timeout".into()))
            }
        }

        let db = ShopDatabase::in_memory().unwrap();
        let registry = CustomerRegistry::new(db.clone(), Arc::new(Down));
        let err = registry.get_or_create("a@example.com").await.unwrap_err();
        assert!(matches!(err, CustomerError::Provider(_)));
        assert_eq!(db.payment_customer_count().unwrap(), 0);
    }
}
