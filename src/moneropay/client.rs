use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

use super::models::{HealthResponse, ReceiveRequest, ReceiveResponse, ReceiveStatusResponse};
use crate::domain::SettlementReport;
use crate::ports::{Gateway, GatewayError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// HTTP client for the MoneroPay wallet gateway.
#[derive(Clone)]
pub struct MoneroPayClient {
    client: Client,
    base_url: String,
    circuit_breaker: Breaker,
}

impl MoneroPayClient {
    /// Creates a client with the default per-call timeout and circuit breaker.
    pub fn new(base_url: String) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self, GatewayError> {
        Self::with_circuit_breaker(base_url, timeout, 5, 30)
    }

    /// Creates a client with custom circuit breaker configuration.
    pub fn with_circuit_breaker(
        base_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Ok(MoneroPayClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            circuit_breaker,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    /// Probes the gateway health endpoint.
    pub async fn health(&self) -> Result<HealthResponse, GatewayError> {
        let url = format!("{}/health", self.base_url);
        let client = self.client.clone();

        self.guarded(async move {
            let response = client.get(&url).send().await.map_err(map_reqwest)?;
            decode(response).await
        })
        .await
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match self.circuit_breaker.call(call).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[async_trait]
impl Gateway for MoneroPayClient {
    async fn open_receive(
        &self,
        amount: i64,
        description: &str,
        callback_url: &str,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/receive", self.base_url);
        let client = self.client.clone();
        let body = ReceiveRequest {
            amount,
            description: description.to_string(),
            callback_url: callback_url.to_string(),
        };

        let response: ReceiveResponse = self
            .guarded(async move {
                let response = client.post(&url).json(&body).send().await.map_err(map_reqwest)?;
                decode(response).await
            })
            .await?;

        if response.address.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "receive response carried an empty address".to_string(),
            ));
        }

        tracing::debug!(address = %response.address, amount, "gateway opened receive request");
        Ok(response.address)
    }

    async fn receive_status(&self, address: &str) -> Result<SettlementReport, GatewayError> {
        let url = format!("{}/receive/{}", self.base_url, address);
        let client = self.client.clone();

        let status: ReceiveStatusResponse = self
            .guarded(async move {
                let response = client.get(&url).send().await.map_err(map_reqwest)?;
                decode(response).await
            })
            .await?;

        Ok(status.into())
    }
}

fn map_reqwest(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Request(e)
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::Status(status.as_u16()));
    }

    let bytes = response.bytes().await.map_err(map_reqwest)?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}
