//! Postgres implementation of LedgerStore.

use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{NewTransaction, Observation, SubTransaction, Transaction};
use crate::ports::{LedgerStore, RepositoryError, RepositoryResult};

const TRANSACTION_COLUMNS: &str = "id, vendor_id, pos_id, amount, amount_in_currency, currency, \
     description, required_confirmations, sub_address, accepted, confirmed, \
     created_at, updated_at, deleted_at";

const SUB_TRANSACTION_COLUMNS: &str = "id, transaction_id, tx_hash, amount, confirmations, fee, \
     height, block_timestamp, unlock_time, locked, double_spend_seen, created_at, updated_at";

/// Postgres-backed ledger store.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_sub_transactions(&self, row: TransactionRow) -> RepositoryResult<Transaction> {
        let subs = self.list_sub_transactions(row.id).await?;
        Ok(row.into_domain(subs))
    }

    /// Attach sub-transactions to many rows with a single query.
    async fn attach_all(&self, rows: Vec<TransactionRow>) -> RepositoryResult<Vec<Transaction>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let sql = format!(
            "SELECT {SUB_TRANSACTION_COLUMNS} FROM sub_transactions \
             WHERE transaction_id = ANY($1) ORDER BY id ASC"
        );
        let sub_rows = sqlx::query_as::<_, SubTransactionRow>(&sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<i64, Vec<SubTransaction>> = HashMap::new();
        for sub in sub_rows {
            grouped
                .entry(sub.transaction_id)
                .or_default()
                .push(sub.into_domain());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let subs = grouped.remove(&row.id).unwrap_or_default();
                row.into_domain(subs)
            })
            .collect())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn find_transaction(&self, id: i64) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => self.with_sub_transactions(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_unconfirmed(&self) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE confirmed = FALSE AND sub_address IS NOT NULL AND deleted_at IS NULL \
             ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        self.attach_all(rows).await
    }

    async fn find_unaddressed(&self, older_than: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE sub_address IS NULL AND deleted_at IS NULL AND created_at < $1 \
             ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.into_domain(Vec::new())).collect())
    }

    async fn create_transaction(&self, new: &NewTransaction) -> RepositoryResult<Transaction> {
        let sql = format!(
            r#"
            INSERT INTO transactions (
                vendor_id, pos_id, amount, amount_in_currency, currency,
                description, required_confirmations
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(new.vendor_id)
            .bind(new.pos_id)
            .bind(new.amount)
            .bind(&new.amount_in_currency)
            .bind(&new.currency)
            .bind(&new.description)
            .bind(new.required_confirmations)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into_domain(Vec::new()))
    }

    async fn set_address(&self, id: i64, address: &str) -> RepositoryResult<Transaction> {
        let sql = format!(
            "UPDATE transactions SET sub_address = $2, updated_at = NOW() \
             WHERE id = $1 AND sub_address IS NULL AND deleted_at IS NULL \
             RETURNING {TRANSACTION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => self.with_sub_transactions(row).await,
            None => match self.find_transaction(id).await? {
                Some(_) => Err(RepositoryError::AddressAlreadyAssigned(id)),
                None => Err(RepositoryError::NotFound(id)),
            },
        }
    }

    async fn upsert_sub_transaction(
        &self,
        transaction_id: i64,
        observation: &Observation,
    ) -> RepositoryResult<SubTransaction> {
        let sql = format!(
            r#"
            INSERT INTO sub_transactions (
                transaction_id, tx_hash, amount, confirmations, fee, height,
                block_timestamp, unlock_time, locked, double_spend_seen
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (transaction_id, tx_hash) DO UPDATE SET
                confirmations = EXCLUDED.confirmations,
                locked = EXCLUDED.locked,
                double_spend_seen = EXCLUDED.double_spend_seen,
                updated_at = NOW()
            RETURNING {SUB_TRANSACTION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SubTransactionRow>(&sql)
            .bind(transaction_id)
            .bind(&observation.tx_hash)
            .bind(observation.amount)
            .bind(observation.confirmations)
            .bind(observation.fee)
            .bind(observation.height)
            .bind(observation.timestamp)
            .bind(observation.unlock_time)
            .bind(observation.locked)
            .bind(observation.double_spend_seen)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into_domain())
    }

    async fn list_sub_transactions(&self, transaction_id: i64) -> RepositoryResult<Vec<SubTransaction>> {
        let sql = format!(
            "SELECT {SUB_TRANSACTION_COLUMNS} FROM sub_transactions \
             WHERE transaction_id = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, SubTransactionRow>(&sql)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    async fn update_settlement_flags(
        &self,
        id: i64,
        accepted: bool,
        confirmed: bool,
    ) -> RepositoryResult<Transaction> {
        let sql = format!(
            "UPDATE transactions SET accepted = $2, confirmed = $3, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {TRANSACTION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(accepted)
            .bind(confirmed)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound(id))?;

        self.with_sub_transactions(row).await
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    vendor_id: i64,
    pos_id: i64,
    amount: i64,
    amount_in_currency: BigDecimal,
    currency: String,
    description: Option<String>,
    required_confirmations: i32,
    sub_address: Option<String>,
    accepted: bool,
    confirmed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self, sub_transactions: Vec<SubTransaction>) -> Transaction {
        Transaction {
            id: self.id,
            vendor_id: self.vendor_id,
            pos_id: self.pos_id,
            amount: self.amount,
            amount_in_currency: self.amount_in_currency,
            currency: self.currency,
            description: self.description,
            required_confirmations: self.required_confirmations,
            sub_address: self.sub_address,
            accepted: self.accepted,
            confirmed: self.confirmed,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            sub_transactions,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubTransactionRow {
    id: i64,
    transaction_id: i64,
    tx_hash: String,
    amount: i64,
    confirmations: i64,
    fee: i64,
    height: i64,
    block_timestamp: DateTime<Utc>,
    unlock_time: i64,
    locked: bool,
    double_spend_seen: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SubTransactionRow {
    fn into_domain(self) -> SubTransaction {
        SubTransaction {
            id: self.id,
            transaction_id: self.transaction_id,
            tx_hash: self.tx_hash,
            amount: self.amount,
            confirmations: self.confirmations,
            fee: self.fee,
            height: self.height,
            timestamp: self.block_timestamp,
            unlock_time: self.unlock_time,
            locked: self.locked,
            double_spend_seen: self.double_spend_seen,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
