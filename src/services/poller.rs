//! Periodic confirmation checker.
//!
//! Every tick lists the unconfirmed addressed transactions, asks the gateway
//! for each address's status and feeds successful reports into the
//! reconciler. Gateway queries run outside the reconciliation lock so a slow
//! gateway never blocks webhook deliveries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::Transaction;
use crate::error::AppError;
use crate::ports::{Gateway, LedgerStore};
use crate::services::reconciler::Reconciler;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub reconciled: usize,
    pub skipped: usize,
}

pub struct ConfirmationPoller {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn Gateway>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

/// Keeps the poller alive. Call [`PollerHandle::shutdown`] to stop it.
pub struct PollerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the poller to stop and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "confirmation poller task ended abnormally");
        }
    }
}

impl ConfirmationPoller {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn Gateway>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            reconciler,
            interval,
        }
    }

    /// Spawn the poll loop on the current runtime.
    pub fn spawn(self) -> PollerHandle {
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(cancel_rx).await });
        PollerHandle { cancel, task }
    }

    async fn run(self, mut cancel_rx: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "confirmation poller started");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        summary = self.sweep() => {
                            debug!(
                                checked = summary.checked,
                                reconciled = summary.reconciled,
                                skipped = summary.skipped,
                                "confirmation sweep finished"
                            );
                        }
                        _ = cancel_rx.changed() => {}
                    }
                }
                _ = cancel_rx.changed() => {}
            }

            // A dropped handle counts as cancellation.
            if *cancel_rx.borrow() || cancel_rx.has_changed().is_err() {
                break;
            }
        }

        info!("confirmation poller stopped");
    }

    /// Run one pass over every unconfirmed transaction.
    ///
    /// A failure for one transaction is logged and skipped; it never aborts
    /// the rest of the sweep.
    pub async fn sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        let pending = match self.store.find_unconfirmed().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "failed to list unconfirmed transactions");
                return summary;
            }
        };

        for transaction in pending {
            let Some(address) = transaction.sub_address.as_deref() else {
                continue;
            };
            summary.checked += 1;

            let report = match self.gateway.receive_status(address).await {
                Ok(report) => report,
                Err(e) => {
                    debug!(transaction_id = transaction.id, error = %e, "status query failed, retrying next tick");
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.reconciler.reconcile(transaction.id, &report).await {
                Ok(_) => summary.reconciled += 1,
                Err(e) => {
                    warn!(transaction_id = transaction.id, error = %e, "reconciliation failed");
                    summary.skipped += 1;
                }
            }
        }

        summary
    }

    /// Query and reconcile one transaction right away, outside the schedule.
    pub async fn poll_one(&self, transaction_id: i64) -> Result<Transaction, AppError> {
        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))?;

        let address = transaction.sub_address.as_deref().ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "Transaction {} has no receiving address",
                transaction_id
            ))
        })?;

        let report = self.gateway.receive_status(address).await?;
        self.reconciler.reconcile(transaction_id, &report).await
    }
}
