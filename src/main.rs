// src/main.rs - Service entry point
use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use portfolio_access::{
    config::AppConfig,
    database::PostgresSource,
    handlers::{router, AppState},
    remote::RemoteSource,
    rest::RestSource,
    service::PortfolioService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    init_tracing(&config);

    info!("Starting portfolio access service...");
    config.log_summary();

    // PostgREST when a project URL is configured, direct Postgres otherwise
    let source: Arc<dyn RemoteSource> = if config.remote.url.is_some() {
        Arc::new(RestSource::new(&config.remote).context("Failed to build PostgREST client")?)
    } else {
        Arc::new(PostgresSource::connect(&config.database).await?)
    };
    info!("Remote source: {}", source.backend());

    let service = PortfolioService::with_table(
        source,
        config.remote.table.clone(),
        config.cache.freshness_window(),
    );

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(service, config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    info!("Listening on http://{}", bind_address);
    info!("Endpoints available:");
    info!("   - GET  /portfolio/:quarter?userId=X");
    info!("   - GET  /quarters/summary?userId=X");
    info!("   - POST /cache/clear?pattern=X");
    info!("   - GET  /cache/status");
    info!("   - GET  /connection, POST /connection/test");
    info!("   - GET  /health, /metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "portfolio_access={},sqlx=warn,tower_http=info",
            config.logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down gracefully...");
        },
    }
}
