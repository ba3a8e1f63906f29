//! Create transaction use case.
//! Opens a payment request: the ledger row is written first, then the gateway
//! is asked for a receiving address bound to a fresh callback token.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{NewTransaction, Transaction, MAX_REQUIRED_CONFIRMATIONS};
use crate::error::AppError;
use crate::ports::{Gateway, LedgerStore, RepositoryError};
use crate::services::callback_token::CallbackTokens;

const MAX_CURRENCY_LEN: usize = 8;

/// Input for the CreateTransaction use case.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransactionInput {
    pub vendor_id: i64,
    pub pos_id: i64,
    pub amount: i64,
    pub description: Option<String>,
    pub amount_in_currency: BigDecimal,
    pub currency: String,
    pub required_confirmations: i32,
}

/// Output of the CreateTransaction use case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTransaction {
    pub transaction_id: i64,
    pub address: String,
}

pub struct CreateTransaction {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn Gateway>,
    tokens: Arc<CallbackTokens>,
}

impl CreateTransaction {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn Gateway>,
        tokens: Arc<CallbackTokens>,
    ) -> Self {
        Self {
            store,
            gateway,
            tokens,
        }
    }

    pub async fn execute(&self, input: CreateTransactionInput) -> Result<CreatedTransaction, AppError> {
        let currency = validate(&input)?;

        let transaction = self
            .store
            .create_transaction(&NewTransaction {
                vendor_id: input.vendor_id,
                pos_id: input.pos_id,
                amount: input.amount,
                amount_in_currency: input.amount_in_currency,
                currency,
                description: input.description,
                required_confirmations: input.required_confirmations,
            })
            .await?;

        let address = self.open_receive(&transaction).await?;
        info!(
            transaction_id = transaction.id,
            vendor_id = transaction.vendor_id,
            pos_id = transaction.pos_id,
            amount = transaction.amount,
            "transaction created"
        );

        Ok(CreatedTransaction {
            transaction_id: transaction.id,
            address,
        })
    }

    /// Retry the receive request for a transaction left without an address.
    ///
    /// Returns the existing address untouched when one is already assigned.
    pub async fn reopen_receive(&self, transaction_id: i64) -> Result<CreatedTransaction, AppError> {
        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))?;

        if let Some(address) = transaction.sub_address.clone() {
            return Ok(CreatedTransaction {
                transaction_id,
                address,
            });
        }

        let address = self.open_receive(&transaction).await?;
        info!(transaction_id, "receive request reopened");

        Ok(CreatedTransaction {
            transaction_id,
            address,
        })
    }

    /// Transactions older than `older_than` that never got an address.
    pub async fn find_unaddressed(&self, older_than: DateTime<Utc>) -> Result<Vec<Transaction>, AppError> {
        Ok(self.store.find_unaddressed(older_than).await?)
    }

    async fn open_receive(&self, transaction: &Transaction) -> Result<String, AppError> {
        let token = self
            .tokens
            .issue(transaction.id)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let callback_url = self.tokens.callback_url(&token);

        let address = self
            .gateway
            .open_receive(
                transaction.amount,
                transaction.description.as_deref().unwrap_or_default(),
                &callback_url,
            )
            .await
            .map_err(|e| {
                warn!(transaction_id = transaction.id, error = %e, "receive request failed, transaction left without address");
                AppError::from(e)
            })?;

        match self.store.set_address(transaction.id, &address).await {
            Ok(_) => Ok(address),
            // Lost a race with a concurrent reopen; keep the address that won.
            Err(RepositoryError::AddressAlreadyAssigned(id)) => self
                .store
                .find_transaction(id)
                .await?
                .and_then(|t| t.sub_address)
                .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Checks the input and returns the trimmed currency code to store.
fn validate(input: &CreateTransactionInput) -> Result<String, AppError> {
    if !(0..=MAX_REQUIRED_CONFIRMATIONS).contains(&input.required_confirmations) {
        return Err(AppError::InvalidArgument(format!(
            "required_confirmations must be between 0 and {}",
            MAX_REQUIRED_CONFIRMATIONS
        )));
    }
    if input.amount <= 0 {
        return Err(AppError::InvalidArgument(
            "amount must be greater than zero".to_string(),
        ));
    }
    let currency = input.currency.trim();
    if currency.is_empty() || currency.chars().count() > MAX_CURRENCY_LEN {
        return Err(AppError::InvalidArgument(format!(
            "currency must be 1 to {} characters",
            MAX_CURRENCY_LEN
        )));
    }
    Ok(currency.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedgerStore;
    use crate::domain::SettlementReport;
    use crate::ports::GatewayError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubGateway {
        down: AtomicBool,
        opened: AtomicUsize,
        callback_urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Gateway for StubGateway {
        async fn open_receive(
            &self,
            _amount: i64,
            _description: &str,
            callback_url: &str,
        ) -> Result<String, GatewayError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(GatewayError::Timeout);
            }
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            self.callback_urls.lock().unwrap().push(callback_url.to_string());
            Ok(format!("8Bsub{}", n))
        }

        async fn receive_status(&self, _address: &str) -> Result<SettlementReport, GatewayError> {
            Ok(SettlementReport::default())
        }
    }

    fn input(required_confirmations: i32) -> CreateTransactionInput {
        CreateTransactionInput {
            vendor_id: 3,
            pos_id: 5,
            amount: 250_000_000_000,
            description: Some("two coffees".to_string()),
            amount_in_currency: "4.50".parse().unwrap(),
            currency: "EUR".to_string(),
            required_confirmations,
        }
    }

    fn use_case() -> (Arc<InMemoryLedgerStore>, Arc<StubGateway>, Arc<CallbackTokens>, CreateTransaction) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let gateway = Arc::new(StubGateway::default());
        let tokens = Arc::new(CallbackTokens::new("cb-secret", "https://pos.example.com/callback"));
        let use_case = CreateTransaction::new(store.clone(), gateway.clone(), tokens.clone());
        (store, gateway, tokens, use_case)
    }

    #[tokio::test]
    async fn test_create_assigns_address() {
        let (store, gateway, tokens, use_case) = use_case();

        let created = use_case.execute(input(1)).await.unwrap();

        assert_eq!(created.address, "8Bsub0");
        let stored = store.find_transaction(created.transaction_id).await.unwrap().unwrap();
        assert_eq!(stored.sub_address.as_deref(), Some("8Bsub0"));
        assert!(!stored.accepted && !stored.confirmed);

        let url = gateway.callback_urls.lock().unwrap()[0].clone();
        let token = url
            .strip_prefix("https://pos.example.com/callback/receive/")
            .unwrap();
        assert_eq!(tokens.verify(token).unwrap(), created.transaction_id);
    }

    #[tokio::test]
    async fn test_invalid_arguments_write_nothing() {
        let (store, gateway, _, use_case) = use_case();

        for bad in [input(-1), input(11)] {
            assert!(matches!(use_case.execute(bad).await, Err(AppError::InvalidArgument(_))));
        }
        let mut zero_amount = input(1);
        zero_amount.amount = 0;
        assert!(matches!(use_case.execute(zero_amount).await, Err(AppError::InvalidArgument(_))));

        for currency in ["TOOLONGCUR", "   ", ""] {
            let mut bad_currency = input(1);
            bad_currency.currency = currency.to_string();
            assert!(matches!(use_case.execute(bad_currency).await, Err(AppError::InvalidArgument(_))));
        }

        assert_eq!(gateway.opened.load(Ordering::SeqCst), 0);
        assert!(store.find_transaction(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_padded_currency_is_stored_trimmed() {
        let (store, _, _, use_case) = use_case();

        let mut padded = input(1);
        padded.currency = "  EUR     ".to_string();
        let created = use_case.execute(padded).await.unwrap();

        let stored = store.find_transaction(created.transaction_id).await.unwrap().unwrap();
        assert_eq!(stored.currency, "EUR");
    }

    #[tokio::test]
    async fn test_boundary_confirmations_accepted() {
        let (_, _, _, use_case) = use_case();
        assert!(use_case.execute(input(0)).await.is_ok());
        assert!(use_case.execute(input(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_unaddressed_row() {
        let (store, gateway, _, use_case) = use_case();
        gateway.down.store(true, Ordering::SeqCst);

        let result = use_case.execute(input(1)).await;
        assert!(matches!(result, Err(AppError::GatewayUnavailable(_))));

        let orphan = store.find_transaction(1).await.unwrap().unwrap();
        assert!(orphan.sub_address.is_none());

        let later = Utc::now() + chrono::Duration::minutes(1);
        let unaddressed = use_case.find_unaddressed(later).await.unwrap();
        assert_eq!(unaddressed.len(), 1);
        assert!(store.find_unconfirmed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_assigns_then_is_idempotent() {
        let (_, gateway, _, use_case) = use_case();
        gateway.down.store(true, Ordering::SeqCst);
        assert!(use_case.execute(input(1)).await.is_err());

        gateway.down.store(false, Ordering::SeqCst);
        let first = use_case.reopen_receive(1).await.unwrap();
        let second = use_case.reopen_receive(1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.opened.load(Ordering::SeqCst), 1);
        assert!(matches!(use_case.reopen_receive(77).await, Err(AppError::NotFound(_))));
    }
}
