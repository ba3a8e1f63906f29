use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::Transaction;
use crate::error::AppError;
use crate::handlers::pos::PosIdentity;
use crate::ports::LedgerStore;
use crate::services::notifier::TransactionUpdate;
use crate::AppState;

const HEARTBEAT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    transaction_id: i64,
}

/// `GET /pos/ws/transaction?transaction_id=`
///
/// Streams [`TransactionUpdate`]s for one transaction owned by the caller.
/// The current state is sent first so a device that connects late still sees
/// the latest flags.
pub async fn transaction_updates(
    ws: WebSocketUpgrade,
    identity: PosIdentity,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let transaction_id = params.transaction_id;

    // Subscribe before the snapshot read so nothing falls in between.
    let rx = state.notifier.subscribe();
    let transaction = identity.owned_transaction(&state, transaction_id).await?;

    let snapshot = snapshot(transaction);
    let store = state.store.clone();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, transaction_id, snapshot, rx, store)))
}

fn snapshot(transaction: Transaction) -> TransactionUpdate {
    TransactionUpdate {
        transaction_id: transaction.id,
        accepted: transaction.accepted,
        confirmed: transaction.confirmed,
        transaction,
        timestamp: Utc::now(),
    }
}

/// Current ledger state for a client that missed broadcasts.
async fn resync(store: &dyn LedgerStore, transaction_id: i64) -> Option<TransactionUpdate> {
    match store.find_transaction(transaction_id).await {
        Ok(Some(transaction)) => Some(snapshot(transaction)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(transaction_id, error = %e, "failed to reload transaction after lag");
            None
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    transaction_id: i64,
    snapshot: TransactionUpdate,
    mut rx: broadcast::Receiver<TransactionUpdate>,
    store: Arc<dyn LedgerStore>,
) {
    let (mut sender, mut receiver) = socket.split();

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => {
                    tracing::debug!(transaction_id, "client closed connection");
                    break;
                }
                Message::Ping(_) => tracing::trace!(transaction_id, "received ping"),
                _ => {}
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        if send_update(&mut sender, &snapshot).await.is_err() {
            return;
        }

        let mut heartbeat_interval =
            tokio::time::interval(tokio::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        heartbeat_interval.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        tracing::debug!(transaction_id, "client disconnected during heartbeat");
                        break;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(update) if update.transaction_id == transaction_id => {
                            if send_update(&mut sender, &update).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(transaction_id, skipped = n, "websocket client lagged behind, resending state");
                            if let Some(update) = resync(store.as_ref(), transaction_id).await {
                                if send_update(&mut sender, &update).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("update channel closed");
                            break;
                        }
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    tracing::debug!(transaction_id, "websocket connection closed");
}

async fn send_update<S>(sender: &mut S, update: &TransactionUpdate) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(update) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(transaction_id = update.transaction_id, error = %e, "failed to serialize update");
            return Ok(());
        }
    };

    sender.send(Message::Text(json)).await.map_err(|_| {
        tracing::debug!(transaction_id = update.transaction_id, "client disconnected");
    })
}
