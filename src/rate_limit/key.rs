//! Client key derivation.
//!
//! A key extractor sees the request's headers and extensions and returns the identity the
//! bucket is tracked under. Returning `None` admits the request unchecked.

use http::header::HeaderName;
use http::{Extensions, HeaderMap};
use std::net::SocketAddr;

/// Derives the bucket key for a request.
pub trait KeyExtractor: Clone + Send + Sync + 'static {
    fn extract(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<String>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&HeaderMap, &Extensions) -> Option<String> + Clone + Send + Sync + 'static,
{
    fn extract(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
        self(headers, extensions)
    }
}

/// Keys on the peer IP, read from a `SocketAddr` request extension.
///
/// The port is dropped so every connection from one host shares a bucket. Servers that expose
/// the peer address differently can pass a closure instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerIp;

impl KeyExtractor for PeerIp {
    fn extract(&self, _headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
        extensions.get::<SocketAddr>().map(|addr| addr.ip().to_string())
    }
}

/// Keys on a header such as `x-forwarded-for` or an API client id.
///
/// For comma-separated values the first entry is used (the original client in a proxy chain).
#[derive(Debug, Clone)]
pub struct HeaderKey {
    header: HeaderName,
    fallback_to_peer: bool,
}

impl HeaderKey {
    pub fn new(header: HeaderName) -> Self {
        Self { header, fallback_to_peer: false }
    }

    /// Fall back to [`PeerIp`] when the header is missing or empty.
    pub fn or_peer_ip(mut self) -> Self {
        self.fallback_to_peer = true;
        self
    }
}

impl KeyExtractor for HeaderKey {
    fn extract(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
        let from_header = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        match from_header {
            Some(key) => Some(key),
            None if self.fallback_to_peer => PeerIp.extract(headers, extensions),
            None => None,
        }
    }
}
