//! Wire types for the MoneroPay gateway API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CoveredAmount, Observation, SettlementReport};

/// Body of `POST /receive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub amount: i64,
    pub description: String,
    pub callback_url: String,
}

/// Response from `POST /receive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveResponse {
    pub address: String,
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Covered {
    pub total: i64,
    pub unlocked: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AmountDetails {
    pub expected: i64,
    pub covered: Covered,
}

/// A transfer as MoneroPay reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub amount: i64,
    pub confirmations: i64,
    pub double_spend_seen: bool,
    pub fee: i64,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub unlock_time: i64,
    pub locked: bool,
}

impl From<Transfer> for Observation {
    fn from(t: Transfer) -> Self {
        Observation {
            tx_hash: t.tx_hash,
            amount: t.amount,
            confirmations: t.confirmations,
            fee: t.fee,
            height: t.height,
            timestamp: t.timestamp,
            unlock_time: t.unlock_time,
            locked: t.locked,
            double_spend_seen: t.double_spend_seen,
        }
    }
}

/// Response from `GET /receive/{address}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveStatusResponse {
    pub amount: AmountDetails,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transactions: Option<Vec<Transfer>>,
}

impl From<ReceiveStatusResponse> for SettlementReport {
    fn from(r: ReceiveStatusResponse) -> Self {
        SettlementReport {
            expected: r.amount.expected,
            covered: CoveredAmount {
                total: r.amount.covered.total,
                unlocked: r.amount.covered.unlocked,
            },
            complete: r.complete,
            observations: r
                .transactions
                .unwrap_or_default()
                .into_iter()
                .map(Observation::from)
                .collect(),
        }
    }
}

/// Body MoneroPay POSTs to the callback URL.
///
/// MoneroPay sends the triggering transfer as `transaction`; a full
/// `transactions` list is accepted as well and both are merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub amount: AmountDetails,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transaction: Option<Transfer>,
    #[serde(default)]
    pub transactions: Option<Vec<Transfer>>,
}

impl From<CallbackPayload> for SettlementReport {
    fn from(p: CallbackPayload) -> Self {
        let mut observations: Vec<Observation> = p
            .transactions
            .unwrap_or_default()
            .into_iter()
            .map(Observation::from)
            .collect();

        if let Some(single) = p.transaction {
            if observations.iter().all(|o| o.tx_hash != single.tx_hash) {
                observations.push(single.into());
            }
        }

        SettlementReport {
            expected: p.amount.expected,
            covered: CoveredAmount {
                total: p.amount.covered.total,
                unlocked: p.amount.covered.unlocked,
            },
            complete: p.complete,
            observations,
        }
    }
}

/// Response from `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: u16,
    pub services: HealthServices,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthServices {
    pub walletrpc: bool,
    pub postgresql: bool,
}
