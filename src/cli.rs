use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::services::ConfirmationPoller;
use crate::AppState;

#[derive(Parser)]
#[command(name = "xmrpos-core")]
#[command(about = "XMRpos Core - Monero point-of-sale payment reconciliation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and confirmation poller (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Validate configuration and print it with secrets masked
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// List transactions that never received a receiving address
    Unaddressed {
        /// Only list transactions older than this many minutes
        #[arg(long, default_value_t = 10)]
        older_than_mins: i64,
    },

    /// Retry the gateway receive request for an address-less transaction
    Reopen {
        #[arg(value_name = "TX_ID")]
        tx_id: i64,
    },

    /// Query the gateway for one transaction and reconcile it now
    Reconcile {
        #[arg(value_name = "TX_ID")]
        tx_id: i64,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_unaddressed(state: &AppState, older_than_mins: i64) -> anyhow::Result<()> {
    let cutoff = unaddressed_cutoff(Utc::now(), older_than_mins)?;
    let transactions = state.create_transaction.find_unaddressed(cutoff).await?;

    if transactions.is_empty() {
        println!("No address-less transactions older than {} minutes", older_than_mins);
        return Ok(());
    }

    println!("{:<10} {:<10} {:<10} {:<16} {:<20}", "ID", "Vendor", "POS", "Amount", "Created");
    println!("{}", "-".repeat(70));
    for tx in transactions {
        println!(
            "{:<10} {:<10} {:<10} {:<16} {:<20}",
            tx.id,
            tx.vendor_id,
            tx.pos_id,
            tx.amount,
            tx.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Creation time a transaction must predate to be listed as address-less.
fn unaddressed_cutoff(now: DateTime<Utc>, older_than_mins: i64) -> anyhow::Result<DateTime<Utc>> {
    Duration::try_minutes(older_than_mins.max(0))
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--older-than-mins {} is out of range", older_than_mins))
}

pub async fn handle_tx_reopen(state: &AppState, tx_id: i64) -> anyhow::Result<()> {
    let created = state.create_transaction.reopen_receive(tx_id).await?;

    tracing::info!(transaction_id = tx_id, "receive address assigned");
    println!("✓ Transaction {} receives at {}", created.transaction_id, created.address);
    Ok(())
}

pub async fn handle_tx_reconcile(state: &AppState, config: &Config, tx_id: i64) -> anyhow::Result<()> {
    let poller = ConfirmationPoller::new(
        state.store.clone(),
        state.gateway.clone(),
        state.reconciler.clone(),
        config.poll_interval(),
    );
    let tx = poller.poll_one(tx_id).await?;

    println!(
        "✓ Transaction {} reconciled: accepted={} confirmed={} sub_transactions={}",
        tx.id,
        tx.accepted,
        tx.confirmed,
        tx.sub_transactions.len()
    );
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", config.masked_database_url());
    println!("  Database Max Connections: {}", config.database_max_connections);
    println!("  MoneroPay Base URL: {}", config.moneropay_base_url);
    println!("  MoneroPay Callback URL: {}", config.moneropay_callback_url);
    println!("  MoneroPay Timeout: {}s", config.moneropay_timeout_secs);
    println!("  Confirmation Poll Interval: {}s", config.confirmation_poll_interval_secs);
    println!("  Log Format: {:?}", config.log_format);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");
    Ok(())
}
