use anyhow::Context;
use axum::http::HeaderName;
use std::net::SocketAddr;
use std::sync::Arc;
use tollgate::{Settings, TokenBucketLimiter};
use tollgate_redis::RedisBucketStore;
use tollgate_server::{app, ClientKey};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 8000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env().context("reading rate limit settings")?;
    let port = match std::env::var("PORT") {
        Ok(raw) => raw.parse::<u16>().with_context(|| format!("invalid PORT {:?}", raw))?,
        Err(_) => DEFAULT_PORT,
    };
    let key_header = settings
        .key_header
        .as_deref()
        .map(HeaderName::try_from)
        .transpose()
        .context("invalid RATE_LIMIT_KEY_HEADER")?;

    // One multiplexed connection for the whole process, handed to the limiter by handle.
    let store = RedisBucketStore::connect(&settings.store_url())
        .await
        .with_context(|| format!("connecting to bucket store at {}", settings.store_url()))?
        .with_prefix(settings.key_prefix.clone())
        .map_err(anyhow::Error::msg)?
        .with_ttl(settings.bucket_ttl);
    let limiter = Arc::new(TokenBucketLimiter::new(Arc::new(store), settings.limiter.clone()));

    tracing::info!(
        capacity = settings.limiter.capacity(),
        window_ms = settings.limiter.window().as_millis() as u64,
        policy = ?settings.limiter.failure_policy(),
        store = %settings.store_url(),
        "rate limiter ready"
    );

    let router = app(limiter, ClientKey::new(key_header));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "server is running");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}
