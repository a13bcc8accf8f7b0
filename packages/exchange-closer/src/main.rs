mod config;

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use config::Config;
use exchange_core::closer::{batch_was_full, run_once, CloserConfig, InMemoryWireAccountDirectory};
use exchange_core::store::Store;
use exchange_db::PgStore;
use tracing::{error, info, warn};

/// Mirrors the original closer's `global_ret` exit taxonomy, collapsed
/// to the cases that still apply once denomination/wireformat plugin
/// loading is a compile-time trait rather than a runtime `dlopen`.
#[repr(u8)]
enum CloserExit {
    Success = 0,
    ConfigurationError = 1,
    DatabaseError = 2,
    LoopFailure = 3,
}

fn main() -> ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install color-eyre: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to build tokio runtime: {e}");
            return ExitCode::from(CloserExit::LoopFailure as u8);
        }
    };

    runtime.block_on(async_main())
}

async fn async_main() -> ExitCode {
    init_logging();
    info!("starting exchange-closer");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(CloserExit::ConfigurationError as u8);
        }
    };
    info!(
        wire_granularity = %config.closer.wire_granularity,
        wire_accounts = config.closer.wire_accounts.len(),
        "configuration loaded"
    );

    let pool = match exchange_db::create_pool(&config.database.url).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to connect to database");
            return ExitCode::from(CloserExit::DatabaseError as u8);
        }
    };
    if let Err(e) = exchange_db::run_migrations(&pool).await {
        error!(error = %e, "failed to run database migrations");
        return ExitCode::from(CloserExit::DatabaseError as u8);
    }
    info!("database connected and migrated");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let closer_config = CloserConfig {
        wire_accounts: Arc::new(InMemoryWireAccountDirectory::new(
            config.closer.wire_accounts.clone(),
        )),
        wire_granularity: config.closer.wire_granularity,
        exchange_base_url: config.closer.exchange_base_url.clone(),
        batch_size: config.closer.batch_size,
    };

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("shutdown signal received, exiting");
                return ExitCode::from(CloserExit::Success as u8);
            }

            result = run_once(store.as_ref(), &closer_config, Utc::now()) => {
                match result {
                    Ok(stats) => {
                        info!(
                            reserves_closed = stats.reserves_closed,
                            reserves_skipped = stats.reserves_skipped_zero_balance,
                            "closer pass complete"
                        );
                        if batch_was_full(&stats, &closer_config) {
                            // More expired reserves may remain: re-arm immediately.
                            continue;
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(error = %e, "closer pass hit a transient storage conflict, retrying immediately");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "closer pass failed");
                        return ExitCode::from(CloserExit::LoopFailure as u8);
                    }
                }
            }
        }

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received, exiting");
                return ExitCode::from(CloserExit::Success as u8);
            }
            _ = tokio::time::sleep(config.closer.idle_interval) => {}
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,exchange_closer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
