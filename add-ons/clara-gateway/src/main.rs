//! Clara gateway: loads configuration, wires `clara-core`, serves `/api/v1`.

mod error;
mod routes;

use clara_core::{ClaraConfig, ClaraRuntime};
use routes::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClaraConfig::load()?;
    tracing::info!(
        "{} starting (storage: {:?}, threshold: {} lines / {}s)",
        config.app_name,
        config.storage_backend,
        config.scheduler.utterance_threshold,
        config.scheduler.debounce_secs
    );

    let runtime = ClaraRuntime::build(&config)?;
    let app = routes::router(AppState {
        app_name: Arc::from(config.app_name.as_str()),
        sessions: runtime.sessions,
        knowledge: runtime.knowledge,
        events: runtime.events,
        lookup: config.knowledge.lookup,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("✓ Listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
