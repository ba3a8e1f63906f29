//! Transaction domain entities.
//! Framework-agnostic representation of a point-of-sale payment request and
//! the on-chain deposits observed against its receiving address.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest `required_confirmations` a device may ask for.
pub const MAX_REQUIRED_CONFIRMATIONS: i32 = 10;

/// One payment request opened by a point-of-sale device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub vendor_id: i64,
    pub pos_id: i64,
    /// Requested amount in atomic units.
    pub amount: i64,
    pub amount_in_currency: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub required_confirmations: i32,
    /// Gateway-assigned receiving subaddress. `None` until the receive request succeeds.
    pub sub_address: Option<String>,
    pub accepted: bool,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub sub_transactions: Vec<SubTransaction>,
}

impl Transaction {
    pub fn is_owned_by(&self, vendor_id: i64, pos_id: i64) -> bool {
        self.vendor_id == vendor_id && self.pos_id == pos_id
    }
}

/// Fields supplied when a device opens a new payment request.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub vendor_id: i64,
    pub pos_id: i64,
    pub amount: i64,
    pub amount_in_currency: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub required_confirmations: i32,
}

/// One on-chain deposit observed against a transaction's address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTransaction {
    pub id: i64,
    pub transaction_id: i64,
    pub tx_hash: String,
    pub amount: i64,
    pub confirmations: i64,
    pub fee: i64,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub unlock_time: i64,
    pub locked: bool,
    pub double_spend_seen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
