//! Capability tokens authorizing gateway callbacks.
//!
//! A token binds exactly one transaction id and expires six hours after it is
//! issued. It is signed with the payment-callback secret, which is never the
//! secret used for device or vendor login tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CALLBACK_TOKEN_TTL_HOURS: i64 = 6;

/// Placeholder substituted with the token in the callback URL template.
pub const TOKEN_PLACEHOLDER: &str = "{jwt}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackClaims {
    pub transaction_id: i64,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("callback token is missing")]
    Missing,

    #[error("invalid callback token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

#[derive(Clone)]
pub struct CallbackTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    url_template: String,
}

impl CallbackTokens {
    pub fn new(secret: &str, url_template: impl Into<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            url_template: url_template.into(),
        }
    }

    pub fn issue(&self, transaction_id: i64) -> Result<String, TokenError> {
        let now = Utc::now();
        self.issue_at(
            transaction_id,
            now,
            now + Duration::hours(CALLBACK_TOKEN_TTL_HOURS),
        )
    }

    fn issue_at(
        &self,
        transaction_id: i64,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = CallbackClaims {
            transaction_id,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Recover the transaction id bound to `token`.
    pub fn verify(&self, token: &str) -> Result<i64, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }

        let data = decode::<CallbackClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims.transaction_id)
    }

    /// Build the URL the gateway will call back.
    pub fn callback_url(&self, token: &str) -> String {
        if self.url_template.contains(TOKEN_PLACEHOLDER) {
            self.url_template.replacen(TOKEN_PLACEHOLDER, token, 1)
        } else {
            format!("{}/receive/{}", self.url_template.trim_end_matches('/'), token)
        }
    }
}
