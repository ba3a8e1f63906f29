pub mod callback_token;
pub mod notifier;
pub mod poller;
pub mod reconciler;

pub use callback_token::{CallbackTokens, TokenError};
pub use notifier::{BroadcastNotifier, TransactionUpdate};
pub use poller::{ConfirmationPoller, PollerHandle, SweepSummary};
pub use reconciler::Reconciler;
