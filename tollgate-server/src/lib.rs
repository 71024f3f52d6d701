//! HTTP front door for services protected by tollgate.
//!
//! The business routes live elsewhere; this crate owns startup wiring and the admission
//! checkpoint that every request passes before routing.

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, HeaderName, StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tollgate::{HeaderKey, KeyExtractor, PeerIp, RateLimitLayer, RateLimiter};
use tower_http::trace::TraceLayer;

/// Client identity: an optional trusted header, then the connection's peer IP.
#[derive(Debug, Clone, Default)]
pub struct ClientKey {
    header: Option<HeaderKey>,
}

impl ClientKey {
    pub fn new(header: Option<HeaderName>) -> Self {
        Self { header: header.map(HeaderKey::new) }
    }
}

impl KeyExtractor for ClientKey {
    fn extract(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
        self.header
            .as_ref()
            .and_then(|h| h.extract(headers, extensions))
            .or_else(|| {
                extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .or_else(|| PeerIp.extract(headers, extensions))
    }
}

/// Build the router: `/health` bypasses the limiter, everything else goes through it.
pub fn app<L>(limiter: Arc<L>, key: ClientKey) -> Router
where
    L: RateLimiter + 'static,
{
    Router::new()
        .fallback(not_found)
        .layer(RateLimitLayer::new(limiter).with_key(key))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found(uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Requested resource {} does not exist", uri) })),
    )
}
