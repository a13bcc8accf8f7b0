mod api;
mod config;
mod metrics;
mod metrics_route;
mod response;
mod state;

use std::sync::Arc;

use config::Config;
use exchange_core::denomination::InMemoryDenominationDirectory;
use exchange_db::PgStore;
use metrics::Metrics;
use state::AppState;
use tracing::info;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("starting exchange-httpd");

    let config = Config::load()?;
    info!(bind_address = %config.http.bind_address, port = config.http.port, "configuration loaded");

    let pool = exchange_db::create_pool(&config.database.url).await?;
    info!("database connected");
    exchange_db::run_migrations(&pool).await?;
    info!("database migrations complete");

    // Denomination key management (rotation, loading from disk) is an
    // external collaborator; this binary starts with an empty set and
    // relies on a future out-of-process loader to populate it.
    let denominations = Arc::new(InMemoryDenominationDirectory::new(vec![]));

    let state = AppState {
        store: Arc::new(PgStore::new(pool)),
        denominations,
        metrics: Arc::new(Metrics::new()),
        exchange_base_url: config.http.exchange_base_url.clone(),
    };

    let app = api::router(state);
    let addr = format!("{}:{}", config.http.bind_address, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,exchange_httpd=debug"));

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
