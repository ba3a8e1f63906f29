//! Ports: the seams between the engine and its collaborators.
//! Adapters under `crate::adapters` and `crate::moneropay` implement these.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{NewTransaction, Observation, SettlementReport, SubTransaction, Transaction};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("transaction {0} not found")]
    NotFound(i64),

    #[error("transaction {0} already has a receiving address")]
    AddressAlreadyAssigned(i64),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        RepositoryError::Database(e.to_string())
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable record of transactions and their sub-transactions.
///
/// Every lookup ignores soft-deleted transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load a transaction with its full sub-transaction set.
    async fn find_transaction(&self, id: i64) -> RepositoryResult<Option<Transaction>>;

    /// Transactions that have an address but are not yet confirmed.
    async fn find_unconfirmed(&self) -> RepositoryResult<Vec<Transaction>>;

    /// Transactions created before `older_than` that never received an address.
    async fn find_unaddressed(&self, older_than: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>>;

    async fn create_transaction(&self, new: &NewTransaction) -> RepositoryResult<Transaction>;

    /// Assign the receiving address. Fails with `AddressAlreadyAssigned` once set.
    async fn set_address(&self, id: i64, address: &str) -> RepositoryResult<Transaction>;

    /// Insert or update the sub-transaction keyed by `(transaction_id, tx_hash)`.
    /// Existing rows keep their id; only confirmations and the locked and
    /// double-spend flags change.
    async fn upsert_sub_transaction(
        &self,
        transaction_id: i64,
        observation: &Observation,
    ) -> RepositoryResult<SubTransaction>;

    async fn list_sub_transactions(&self, transaction_id: i64) -> RepositoryResult<Vec<SubTransaction>>;

    /// Persist the derived flags and return the refreshed transaction.
    async fn update_settlement_flags(
        &self,
        id: i64,
        accepted: bool,
        confirmed: bool,
    ) -> RepositoryResult<Transaction>;

    async fn ping(&self) -> RepositoryResult<()>;
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway returned status {0}")]
    Status(u16),

    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),

    #[error("gateway circuit breaker is open")]
    CircuitBreakerOpen,
}

/// Outbound interface to the wallet gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Open a receive request and return the assigned subaddress.
    async fn open_receive(
        &self,
        amount: i64,
        description: &str,
        callback_url: &str,
    ) -> Result<String, GatewayError>;

    /// Current settlement view of a receiving address.
    async fn receive_status(&self, address: &str) -> Result<SettlementReport, GatewayError>;
}

/// Fan-out hook invoked after every successful reconciliation.
pub trait Notifier: Send + Sync {
    fn notify(&self, transaction_id: i64, transaction: &Transaction);
}
