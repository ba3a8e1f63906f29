//! Storage adapters implementing `crate::ports::LedgerStore`.

pub mod memory_ledger_store;
pub mod postgres_ledger_store;

pub use memory_ledger_store::InMemoryLedgerStore;
pub use postgres_ledger_store::PostgresLedgerStore;
