pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod moneropay;
pub mod ports;
pub mod services;
pub mod startup;
pub mod use_cases;
pub mod utils;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::middleware::{request_logger_middleware, RequestLogging};
use crate::ports::{Gateway, LedgerStore};
use crate::services::notifier::UPDATE_CHANNEL_CAPACITY;
use crate::services::{BroadcastNotifier, CallbackTokens, Reconciler};
use crate::use_cases::CreateTransaction;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn Gateway>,
    pub tokens: Arc<CallbackTokens>,
    pub reconciler: Arc<Reconciler>,
    pub create_transaction: Arc<CreateTransaction>,
    pub notifier: BroadcastNotifier,
}

impl AppState {
    /// Wire the engine around a ledger store and a gateway.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn Gateway>,
        tokens: CallbackTokens,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let notifier = BroadcastNotifier::new(tx);
        let tokens = Arc::new(tokens);

        let reconciler = Arc::new(Reconciler::new(store.clone(), Arc::new(notifier.clone())));
        let create_transaction = Arc::new(CreateTransaction::new(
            store.clone(),
            gateway.clone(),
            tokens.clone(),
        ));

        Self {
            store,
            gateway,
            tokens,
            reconciler,
            create_transaction,
            notifier,
        }
    }
}

pub fn create_app(state: AppState, logging: RequestLogging) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/callback/receive/:token", post(handlers::callback::receive))
        .route("/pos/transactions", post(handlers::pos::create_transaction))
        .route("/pos/transactions/:id", get(handlers::pos::get_transaction))
        .route("/pos/ws/transaction", get(handlers::ws::transaction_updates))
        .layer(axum::middleware::from_fn_with_state(
            logging,
            request_logger_middleware,
        ))
        .with_state(state)
}
