use crate::adapters::PostgresLedgerStore;
use crate::config::Config;
use crate::moneropay::MoneroPayClient;
use crate::services::CallbackTokens;
use crate::AppState;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

pub fn gateway_client(config: &Config) -> Result<MoneroPayClient> {
    MoneroPayClient::with_timeout(config.moneropay_base_url.clone(), config.gateway_timeout())
        .context("Failed to build MoneroPay HTTP client")
}

/// Build the application state backed by Postgres and the MoneroPay gateway.
pub fn build_state(config: &Config, pool: PgPool, gateway: MoneroPayClient) -> AppState {
    AppState::new(
        Arc::new(PostgresLedgerStore::new(pool)),
        Arc::new(gateway),
        CallbackTokens::new(&config.jwt_moneropay_secret, config.moneropay_callback_url.clone()),
    )
}

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("MoneroPay Gateway:     {}", status(self.gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(
    config: &Config,
    pool: &PgPool,
    gateway: &MoneroPayClient,
) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        gateway: true,
        errors: Vec::new(),
    };

    if let Err(e) = config.validate() {
        report.environment = false;
        report.errors.push(format!("Environment: {:#}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {:#}", e));
    }

    if let Err(e) = validate_gateway(gateway).await {
        report.gateway = false;
        report.errors.push(format!("MoneroPay: {:#}", e));
    }

    report
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_gateway(gateway: &MoneroPayClient) -> Result<()> {
    let health = gateway
        .health()
        .await
        .with_context(|| format!("Failed to reach MoneroPay at {}", gateway.base_url()))?;

    if !health.services.walletrpc {
        anyhow::bail!("MoneroPay reports wallet RPC unavailable");
    }
    if !health.services.postgresql {
        anyhow::bail!("MoneroPay reports its database unavailable");
    }

    Ok(())
}
