//! Settlement reports and the derived accepted/confirmed flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SubTransaction;

/// Confirmations after which a deposit counts as final.
pub const CONFIRMATION_MATURITY: i64 = 10;

/// Gateway-reported sums for an address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveredAmount {
    /// Sum of every observed deposit regardless of maturity.
    pub total: i64,
    /// Part of `total` that is past the unlock threshold.
    pub unlocked: i64,
}

/// A single deposit as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub tx_hash: String,
    pub amount: i64,
    pub confirmations: i64,
    pub fee: i64,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub unlock_time: i64,
    pub locked: bool,
    pub double_spend_seen: bool,
}

/// The gateway's point-in-time view of a receiving address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub expected: i64,
    pub covered: CoveredAmount,
    pub complete: bool,
    pub observations: Vec<Observation>,
}

/// Flags derived from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementStatus {
    pub accepted: bool,
    pub confirmed: bool,
}

impl SettlementStatus {
    /// Recompute both flags from scratch.
    ///
    /// `accepted` needs every deposit at `required_confirmations` and the
    /// covered total to reach `amount`. `confirmed` needs every deposit at
    /// [`CONFIRMATION_MATURITY`] and the unlocked total to reach `amount`.
    /// An empty deposit set satisfies the per-deposit clause on its own.
    pub fn evaluate(
        sub_transactions: &[SubTransaction],
        required_confirmations: i32,
        amount: i64,
        covered: &CoveredAmount,
    ) -> Self {
        let required = i64::from(required_confirmations);

        let accepted = sub_transactions
            .iter()
            .all(|sub| sub.confirmations >= required)
            && covered.total >= amount;

        let confirmed = sub_transactions
            .iter()
            .all(|sub| sub.confirmations >= CONFIRMATION_MATURITY)
            && covered.unlocked >= amount;

        Self {
            accepted,
            confirmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(confirmations: i64) -> SubTransaction {
        let now = Utc::now();
        SubTransaction {
            id: 1,
            transaction_id: 1,
            tx_hash: "H1".to_string(),
            amount: 100,
            confirmations,
            fee: 1,
            height: 3_000_000,
            timestamp: now,
            unlock_time: 0,
            locked: true,
            double_spend_seen: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn covered(total: i64, unlocked: i64) -> CoveredAmount {
        CoveredAmount { total, unlocked }
    }

    #[test]
    fn test_accepted_requires_every_sub_at_threshold() {
        let status = SettlementStatus::evaluate(&[sub(1)], 2, 100, &covered(100, 0));
        assert!(!status.accepted);

        let status = SettlementStatus::evaluate(&[sub(2)], 2, 100, &covered(100, 0));
        assert!(status.accepted);

        let status = SettlementStatus::evaluate(&[sub(2), sub(1)], 2, 100, &covered(200, 0));
        assert!(!status.accepted);
    }

    #[test]
    fn test_accepted_requires_covered_total() {
        let status = SettlementStatus::evaluate(&[sub(5)], 1, 100, &covered(99, 99));
        assert!(!status.accepted);
    }

    #[test]
    fn test_zero_required_confirmations_accepts_mempool() {
        let status = SettlementStatus::evaluate(&[sub(0)], 0, 100, &covered(100, 0));
        assert!(status.accepted);
        assert!(!status.confirmed);
    }

    #[test]
    fn test_confirmed_never_below_maturity() {
        let status = SettlementStatus::evaluate(&[sub(9)], 0, 100, &covered(1_000, 1_000));
        assert!(!status.confirmed);

        let status = SettlementStatus::evaluate(&[sub(10)], 0, 100, &covered(100, 100));
        assert!(status.confirmed);
    }

    #[test]
    fn test_confirmed_requires_unlocked_amount() {
        let status = SettlementStatus::evaluate(&[sub(12)], 1, 100, &covered(100, 50));
        assert!(status.accepted);
        assert!(!status.confirmed);
    }

    #[test]
    fn test_empty_set_driven_by_covered_amounts() {
        let status = SettlementStatus::evaluate(&[], 3, 100, &covered(0, 0));
        assert_eq!(status, SettlementStatus::default());

        let status = SettlementStatus::evaluate(&[], 3, 100, &covered(100, 100));
        assert!(status.accepted);
        assert!(status.confirmed);
    }
}
