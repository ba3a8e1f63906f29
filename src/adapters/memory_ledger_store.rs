//! In-memory implementation of LedgerStore.
//! Mirrors the Postgres adapter's semantics; used by tests and local runs
//! without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{NewTransaction, Observation, SubTransaction, Transaction};
use crate::ports::{LedgerStore, RepositoryError, RepositoryResult};

#[derive(Default)]
struct Inner {
    next_transaction_id: i64,
    next_sub_transaction_id: i64,
    transactions: BTreeMap<i64, Transaction>,
    sub_transactions: BTreeMap<i64, Vec<SubTransaction>>,
}

impl Inner {
    fn live(&self, id: i64) -> Option<&Transaction> {
        self.transactions
            .get(&id)
            .filter(|tx| tx.deleted_at.is_none())
    }

    fn hydrate(&self, tx: &Transaction) -> Transaction {
        let mut tx = tx.clone();
        tx.sub_transactions = self
            .sub_transactions
            .get(&tx.id)
            .cloned()
            .unwrap_or_default();
        tx
    }
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft-delete a transaction. Deletion belongs to vendor management; the
    /// engine itself never calls this.
    pub async fn soft_delete(&self, id: i64) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        tx.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_transaction(&self, id: i64) -> RepositoryResult<Option<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner.live(id).map(|tx| inner.hydrate(tx)))
    }

    async fn find_unconfirmed(&self) -> RepositoryResult<Vec<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| tx.deleted_at.is_none() && !tx.confirmed && tx.sub_address.is_some())
            .map(|tx| inner.hydrate(tx))
            .collect())
    }

    async fn find_unaddressed(&self, older_than: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| {
                tx.deleted_at.is_none() && tx.sub_address.is_none() && tx.created_at < older_than
            })
            .cloned()
            .collect())
    }

    async fn create_transaction(&self, new: &NewTransaction) -> RepositoryResult<Transaction> {
        let mut inner = self.inner.write().await;
        inner.next_transaction_id += 1;
        let now = Utc::now();

        let tx = Transaction {
            id: inner.next_transaction_id,
            vendor_id: new.vendor_id,
            pos_id: new.pos_id,
            amount: new.amount,
            amount_in_currency: new.amount_in_currency.clone(),
            currency: new.currency.clone(),
            description: new.description.clone(),
            required_confirmations: new.required_confirmations,
            sub_address: None,
            accepted: false,
            confirmed: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sub_transactions: Vec::new(),
        };
        inner.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn set_address(&self, id: i64, address: &str) -> RepositoryResult<Transaction> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&id)
            .filter(|tx| tx.deleted_at.is_none())
            .ok_or(RepositoryError::NotFound(id))?;

        if tx.sub_address.is_some() {
            return Err(RepositoryError::AddressAlreadyAssigned(id));
        }
        tx.sub_address = Some(address.to_string());
        tx.updated_at = Utc::now();

        let tx = tx.clone();
        Ok(inner.hydrate(&tx))
    }

    async fn upsert_sub_transaction(
        &self,
        transaction_id: i64,
        observation: &Observation,
    ) -> RepositoryResult<SubTransaction> {
        let mut inner = self.inner.write().await;
        if !inner.transactions.contains_key(&transaction_id) {
            return Err(RepositoryError::Database(format!(
                "foreign key violation: transaction {} does not exist",
                transaction_id
            )));
        }

        let now = Utc::now();
        let existing = inner
            .sub_transactions
            .get_mut(&transaction_id)
            .and_then(|subs| subs.iter_mut().find(|s| s.tx_hash == observation.tx_hash));

        if let Some(sub) = existing {
            sub.confirmations = observation.confirmations;
            sub.locked = observation.locked;
            sub.double_spend_seen = observation.double_spend_seen;
            sub.updated_at = now;
            return Ok(sub.clone());
        }

        inner.next_sub_transaction_id += 1;
        let sub = SubTransaction {
            id: inner.next_sub_transaction_id,
            transaction_id,
            tx_hash: observation.tx_hash.clone(),
            amount: observation.amount,
            confirmations: observation.confirmations,
            fee: observation.fee,
            height: observation.height,
            timestamp: observation.timestamp,
            unlock_time: observation.unlock_time,
            locked: observation.locked,
            double_spend_seen: observation.double_spend_seen,
            created_at: now,
            updated_at: now,
        };
        inner
            .sub_transactions
            .entry(transaction_id)
            .or_default()
            .push(sub.clone());
        Ok(sub)
    }

    async fn list_sub_transactions(&self, transaction_id: i64) -> RepositoryResult<Vec<SubTransaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sub_transactions
            .get(&transaction_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_settlement_flags(
        &self,
        id: i64,
        accepted: bool,
        confirmed: bool,
    ) -> RepositoryResult<Transaction> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&id)
            .filter(|tx| tx.deleted_at.is_none())
            .ok_or(RepositoryError::NotFound(id))?;

        tx.accepted = accepted;
        tx.confirmed = confirmed;
        tx.updated_at = Utc::now();

        let tx = tx.clone();
        Ok(inner.hydrate(&tx))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}
