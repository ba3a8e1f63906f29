use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::Transaction;
use crate::ports::Notifier;

pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Live update pushed to connected devices after a reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub transaction_id: i64,
    pub accepted: bool,
    pub confirmed: bool,
    pub transaction: Transaction,
    pub timestamp: DateTime<Utc>,
}

/// Fans updates out over a tokio broadcast channel. Sending never blocks; a
/// send with no subscribers is dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<TransactionUpdate>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<TransactionUpdate>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionUpdate> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, transaction_id: i64, transaction: &Transaction) {
        let update = TransactionUpdate {
            transaction_id,
            accepted: transaction.accepted,
            confirmed: transaction.confirmed,
            transaction: transaction.clone(),
            timestamp: Utc::now(),
        };

        match self.tx.send(update) {
            Ok(receivers) => tracing::debug!(transaction_id, receivers, "transaction update broadcast"),
            Err(_) => tracing::trace!(transaction_id, "no subscribers for transaction update"),
        }
    }
}
