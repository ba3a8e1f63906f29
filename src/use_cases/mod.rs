//! Use cases: application operations composed from the ports.

pub mod create_transaction;

pub use create_transaction::{CreateTransaction, CreateTransactionInput, CreatedTransaction};
