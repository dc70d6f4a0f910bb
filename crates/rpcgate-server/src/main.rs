use axum::{Router, routing::get};
use metrics_exporter_prometheus::PrometheusBuilder;
use rpcgate_core::ArchiveCatalog;
use rpcgate_server::{AppState, GatewayConfig, build_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpcgate_server=info,rpcgate_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize metrics
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).ok();

    let config = GatewayConfig::from_env()?;
    tracing::info!("Starting gateway with config: {:?}", config);
    if config.client_secret.is_none() {
        tracing::warn!("RPCGATE_CLIENT_SECRET is not set; the authority will refuse introspection");
    }

    let state = AppState::from_config(&config, ArchiveCatalog::with_builtin())?;

    // Spawn cache purge worker
    let validator = state.validator.clone();
    let purge_interval = config.purge_interval;
    tokio::spawn(async move {
        tracing::info!("Token cache purge worker started");
        let mut interval = tokio::time::interval(purge_interval);
        loop {
            interval.tick().await;
            let purged = validator.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired token validations");
            }
        }
    });

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let rendered = handle.render();
                async move { rendered }
            }),
        )
        .merge(build_router(state));

    tracing::info!("listening on {}", config.bind);
    axum::Server::bind(&config.bind)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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

    tracing::info!("signal received, starting graceful shutdown");
}
