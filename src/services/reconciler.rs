//! Settlement reconciliation.
//!
//! Both ingestion paths (gateway webhook and confirmation poller) funnel into
//! [`Reconciler::reconcile`]. A single process-wide lock serializes passes for
//! every transaction, so a webhook and a poll for the same address can never
//! interleave their upserts and flag writes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{SettlementReport, SettlementStatus, Transaction};
use crate::error::AppError;
use crate::ports::{LedgerStore, Notifier};

pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            lock: Mutex::new(()),
        }
    }

    /// Merge `report` into the ledger and recompute the derived flags.
    ///
    /// Replaying the same report is a no-op on the final state: deposits are
    /// upserted by hash and both flags are recomputed from the stored set.
    pub async fn reconcile(
        &self,
        transaction_id: i64,
        report: &SettlementReport,
    ) -> Result<Transaction, AppError> {
        let _guard = self.lock.lock().await;
        let transaction = self.apply(transaction_id, report).await?;

        // Published under the lock so subscribers see updates in commit order.
        self.notifier.notify(transaction.id, &transaction);
        Ok(transaction)
    }

    async fn apply(
        &self,
        transaction_id: i64,
        report: &SettlementReport,
    ) -> Result<Transaction, AppError> {
        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))?;

        for observation in &report.observations {
            self.store
                .upsert_sub_transaction(transaction.id, observation)
                .await?;
        }

        let sub_transactions = self.store.list_sub_transactions(transaction.id).await?;

        if sub_transactions.is_empty() && report.covered.total > 0 {
            warn!(
                transaction_id,
                covered_total = report.covered.total,
                "settlement report covers funds without any observed transfer"
            );
        }

        let status = SettlementStatus::evaluate(
            &sub_transactions,
            transaction.required_confirmations,
            transaction.amount,
            &report.covered,
        );

        let updated = self
            .store
            .update_settlement_flags(transaction.id, status.accepted, status.confirmed)
            .await?;

        if status.accepted != transaction.accepted || status.confirmed != transaction.confirmed {
            info!(
                transaction_id,
                accepted = status.accepted,
                confirmed = status.confirmed,
                "transaction settlement state changed"
            );
        } else {
            debug!(
                transaction_id,
                sub_transactions = sub_transactions.len(),
                "transaction reconciled without state change"
            );
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedgerStore;
    use crate::domain::{CoveredAmount, NewTransaction, Observation};
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    const ONE_XMR: i64 = 1_000_000_000_000;

    #[derive(Default)]
    struct RecordingNotifier {
        calls: StdMutex<Vec<(i64, bool, bool)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, transaction_id: i64, transaction: &Transaction) {
            self.calls
                .lock()
                .unwrap()
                .push((transaction_id, transaction.accepted, transaction.confirmed));
        }
    }

    async fn setup(required_confirmations: i32) -> (Arc<InMemoryLedgerStore>, Arc<RecordingNotifier>, Reconciler, i64) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let tx = store
            .create_transaction(&NewTransaction {
                vendor_id: 1,
                pos_id: 1,
                amount: ONE_XMR,
                amount_in_currency: BigDecimal::from(150),
                currency: "EUR".to_string(),
                description: Some("espresso".to_string()),
                required_confirmations,
            })
            .await
            .unwrap();
        store.set_address(tx.id, "A1").await.unwrap();

        let reconciler = Reconciler::new(store.clone(), notifier.clone());
        (store, notifier, reconciler, tx.id)
    }

    fn report(hash: &str, confirmations: i64, total: i64, unlocked: i64) -> SettlementReport {
        SettlementReport {
            expected: ONE_XMR,
            covered: CoveredAmount { total, unlocked },
            complete: total >= ONE_XMR,
            observations: vec![Observation {
                tx_hash: hash.to_string(),
                amount: ONE_XMR,
                confirmations,
                fee: 30_000_000,
                height: 3_200_000,
                timestamp: Utc::now(),
                unlock_time: 0,
                locked: confirmations < 10,
                double_spend_seen: false,
            }],
        }
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_not_found() {
        let (_, notifier, reconciler, _) = setup(1).await;
        let result = reconciler.reconcile(999, &report("H1", 1, ONE_XMR, 0)).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(notifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replaying_report_is_idempotent() {
        let (store, _, reconciler, id) = setup(1).await;
        let report = report("H1", 1, ONE_XMR, 0);

        let first = reconciler.reconcile(id, &report).await.unwrap();
        let second = reconciler.reconcile(id, &report).await.unwrap();

        assert_eq!(first.sub_transactions.len(), 1);
        assert_eq!(second.sub_transactions.len(), 1);
        assert_eq!(first.sub_transactions[0].id, second.sub_transactions[0].id);
        assert_eq!((first.accepted, first.confirmed), (second.accepted, second.confirmed));
        assert_eq!(store.list_sub_transactions(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_hash_updates_existing_row() {
        let (store, _, reconciler, id) = setup(1).await;

        let first = reconciler.reconcile(id, &report("H1", 1, ONE_XMR, 0)).await.unwrap();
        let second = reconciler.reconcile(id, &report("H1", 4, ONE_XMR, 0)).await.unwrap();

        let subs = store.list_sub_transactions(id).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].confirmations, 4);
        assert_eq!(first.sub_transactions[0].id, second.sub_transactions[0].id);
    }

    #[tokio::test]
    async fn test_acceptance_threshold() {
        let (_, _, reconciler, id) = setup(2).await;

        let tx = reconciler.reconcile(id, &report("H1", 1, ONE_XMR, 0)).await.unwrap();
        assert!(!tx.accepted);

        let tx = reconciler.reconcile(id, &report("H1", 2, ONE_XMR, 0)).await.unwrap();
        assert!(tx.accepted);
        assert!(!tx.confirmed);
    }

    #[tokio::test]
    async fn test_confirmation_threshold() {
        let (_, _, reconciler, id) = setup(1).await;

        let tx = reconciler
            .reconcile(id, &report("H1", 9, ONE_XMR, ONE_XMR))
            .await
            .unwrap();
        assert!(!tx.confirmed);

        let tx = reconciler
            .reconcile(id, &report("H1", 10, ONE_XMR, ONE_XMR))
            .await
            .unwrap();
        assert!(tx.confirmed);
    }

    #[tokio::test]
    async fn test_webhook_then_poll_scenario() {
        let (store, notifier, reconciler, id) = setup(1).await;

        let tx = reconciler.reconcile(id, &report("H1", 1, ONE_XMR, 0)).await.unwrap();
        assert!(tx.accepted);
        assert!(!tx.confirmed);

        let tx = reconciler
            .reconcile(id, &report("H1", 10, ONE_XMR, ONE_XMR))
            .await
            .unwrap();
        assert!(tx.accepted);
        assert!(tx.confirmed);

        let subs = store.list_sub_transactions(id).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].tx_hash, "H1");

        let calls = notifier.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(id, true, false), (id, true, true)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_do_not_duplicate_rows() {
        let (store, notifier, reconciler, id) = setup(1).await;
        let reconciler = Arc::new(reconciler);

        let webhook = report("H1", 1, ONE_XMR, 0);
        let poll = report("H1", 10, ONE_XMR, ONE_XMR);

        let mut handles = Vec::new();
        for i in 0..8 {
            let reconciler = reconciler.clone();
            let report = if i % 2 == 0 { webhook.clone() } else { poll.clone() };
            handles.push(tokio::spawn(async move { reconciler.reconcile(id, &report).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let subs = store.list_sub_transactions(id).await.unwrap();
        assert_eq!(subs.len(), 1);

        let tx = store.find_transaction(id).await.unwrap().unwrap();
        match subs[0].confirmations {
            1 => assert_eq!((tx.accepted, tx.confirmed), (true, false)),
            10 => assert_eq!((tx.accepted, tx.confirmed), (true, true)),
            other => panic!("unexpected confirmations {}", other),
        }

        // The last published update matches what was committed last.
        let calls = notifier.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 8);
        assert_eq!(calls.last(), Some(&(id, tx.accepted, tx.confirmed)));
    }

    #[tokio::test]
    async fn test_empty_report_keeps_flags_false() {
        let (store, _, reconciler, id) = setup(0).await;
        let empty = SettlementReport {
            expected: ONE_XMR,
            ..SettlementReport::default()
        };

        let tx = reconciler.reconcile(id, &empty).await.unwrap();
        assert!(!tx.accepted);
        assert!(!tx.confirmed);
        assert!(store.list_sub_transactions(id).await.unwrap().is_empty());
    }
}
