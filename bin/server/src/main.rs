use aichat_server::{build_service, config::ServerConfig, routes, sweeper};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        std::io::Error::other(format!("configuration error: {e}"))
    })?;
    tracing::info!(
        provider = %config.provider.base_url,
        model = %config.provider.model,
        "Loaded configuration"
    );

    let service = build_service(&config).map_err(|e| {
        tracing::error!(error = %e, "Failed to build completion provider");
        std::io::Error::other(format!("provider error: {e}"))
    })?;
    let service = Arc::new(service);

    // Spawn periodic idle room eviction
    if let Some(idle_ttl) = config.session.idle_ttl() {
        tracing::info!(
            idle_ttl_secs = idle_ttl.as_secs(),
            "Idle room eviction enabled"
        );
        sweeper::spawn(
            Arc::clone(&service),
            idle_ttl,
            config.session.sweep_interval(),
        );
    }

    let app = routes::router(service);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
