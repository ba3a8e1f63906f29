use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xmrpos_core::cli::{self, Cli, Commands, DbCommands, TxCommands};
use xmrpos_core::config::{Config, LogFormat};
use xmrpos_core::middleware::RequestLogging;
use xmrpos_core::services::ConfirmationPoller;
use xmrpos_core::{create_app, db, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Tx(command) => {
            config.validate()?;
            let pool = db::create_pool(&config).await?;
            let state = startup::build_state(&config, pool, startup::gateway_client(&config)?);

            match command {
                TxCommands::Unaddressed { older_than_mins } => {
                    cli::handle_tx_unaddressed(&state, older_than_mins).await
                }
                TxCommands::Reopen { tx_id } => cli::handle_tx_reopen(&state, tx_id).await,
                TxCommands::Reconcile { tx_id } => {
                    cli::handle_tx_reconcile(&state, &config, tx_id).await
                }
            }
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let gateway = startup::gateway_client(&config)?;
    let report = startup::validate_environment(&config, &pool, &gateway).await;
    if !report.is_valid() {
        report.print();
        // The gateway may come up after us; the poller and webhook redelivery catch up.
        if !(report.environment && report.database) {
            anyhow::bail!("startup validation failed");
        }
        tracing::warn!("MoneroPay gateway not healthy at startup, continuing");
    }
    tracing::info!(base_url = %gateway.base_url(), "MoneroPay client initialized");

    let state = startup::build_state(&config, pool, gateway);

    let poller = ConfirmationPoller::new(
        state.store.clone(),
        state.gateway.clone(),
        state.reconciler.clone(),
        config.poll_interval(),
    )
    .spawn();

    let app = create_app(
        state,
        RequestLogging {
            log_body: config.log_request_body,
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
