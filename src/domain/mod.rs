//! Domain layer: entities and pure settlement rules.

pub mod settlement;
pub mod transaction;

pub use settlement::{
    CoveredAmount, Observation, SettlementReport, SettlementStatus, CONFIRMATION_MATURITY,
};
pub use transaction::{NewTransaction, SubTransaction, Transaction, MAX_REQUIRED_CONFIRMATIONS};
