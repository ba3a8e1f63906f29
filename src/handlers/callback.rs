use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};

use crate::domain::SettlementReport;
use crate::error::AppError;
use crate::moneropay::CallbackPayload;
use crate::AppState;

/// `POST /callback/receive/:token`
///
/// The token is the only credential and is checked before the body is
/// decoded. Once it verifies, the delivered report is reconciled against the
/// bound transaction. Any status other than 200 makes the gateway redeliver,
/// which the merge-by-hash reconciliation tolerates.
pub async fn receive(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let transaction_id = state.tokens.verify(&token)?;
    let payload: CallbackPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(transaction_id, error = %e, "malformed callback body");
        AppError::InvalidArgument("malformed callback body".to_string())
    })?;
    let report = SettlementReport::from(payload);

    tracing::debug!(
        transaction_id,
        observations = report.observations.len(),
        covered_total = report.covered.total,
        "callback received"
    );

    state.reconciler.reconcile(transaction_id, &report).await?;
    Ok(StatusCode::OK)
}
