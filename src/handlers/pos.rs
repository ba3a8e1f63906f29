//! Device-facing transaction endpoints.
//!
//! Caller identity arrives as `X-Vendor-Id` / `X-Pos-Id` headers set by the
//! authentication layer in front of this service.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::request::Parts,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::domain::Transaction;
use crate::error::AppError;
use crate::use_cases::{CreateTransactionInput, CreatedTransaction};
use crate::AppState;

pub const VENDOR_ID_HEADER: &str = "x-vendor-id";
pub const POS_ID_HEADER: &str = "x-pos-id";

/// Authenticated point-of-sale device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosIdentity {
    pub vendor_id: i64,
    pub pos_id: i64,
}

#[async_trait]
impl<S> FromRequestParts<S> for PosIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PosIdentity {
            vendor_id: header_id(parts, VENDOR_ID_HEADER)?,
            pos_id: header_id(parts, POS_ID_HEADER)?,
        })
    }
}

fn header_id(parts: &Parts, name: &str) -> Result<i64, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing or invalid {} header", name)))
}

impl PosIdentity {
    /// Load a transaction the caller is allowed to see.
    pub async fn owned_transaction(&self, state: &AppState, id: i64) -> Result<Transaction, AppError> {
        let transaction = state
            .store
            .find_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))?;

        if !transaction.is_owned_by(self.vendor_id, self.pos_id) {
            return Err(AppError::Forbidden(format!(
                "Transaction {} belongs to another device",
                id
            )));
        }
        Ok(transaction)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub amount: i64,
    pub description: Option<String>,
    pub amount_in_currency: BigDecimal,
    pub currency: String,
    pub required_confirmations: i32,
}

/// `POST /pos/transactions`
pub async fn create_transaction(
    State(state): State<AppState>,
    identity: PosIdentity,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<Json<CreatedTransaction>, AppError> {
    let created = state
        .create_transaction
        .execute(CreateTransactionInput {
            vendor_id: identity.vendor_id,
            pos_id: identity.pos_id,
            amount: request.amount,
            description: request.description,
            amount_in_currency: request.amount_in_currency,
            currency: request.currency,
            required_confirmations: request.required_confirmations,
        })
        .await?;

    Ok(Json(created))
}

/// `GET /pos/transactions/:id`
pub async fn get_transaction(
    State(state): State<AppState>,
    identity: PosIdentity,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = identity.owned_transaction(&state, id).await?;
    Ok(Json(transaction))
}
