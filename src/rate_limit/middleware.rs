use crate::rate_limit::key::{KeyExtractor, PeerIp};
use crate::rate_limit::{Decision, RateLimiter};
use futures::FutureExt;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Request, Response, StatusCode};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Header carrying whole tokens left after an admitted request.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

const DEFAULT_REJECTION_MESSAGE: &str = "Too many requests per minute";

#[derive(serde::Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// A layer that enforces per-client rate limits using a [`RateLimiter`].
pub struct RateLimitLayer<L, K = PeerIp> {
    limiter: Arc<L>,
    extractor: K,
    message: Arc<str>,
}

impl<L, K: Clone> Clone for RateLimitLayer<L, K> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
            message: self.message.clone(),
        }
    }
}

impl<L, K: std::fmt::Debug> std::fmt::Debug for RateLimitLayer<L, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("extractor", &self.extractor)
            .field("message", &self.message)
            .finish()
    }
}

impl<L> RateLimitLayer<L, PeerIp> {
    /// Create a layer keyed on the peer IP. The limiter handle is shared by every service clone.
    pub fn new(limiter: Arc<L>) -> Self {
        Self { limiter, extractor: PeerIp, message: Arc::from(DEFAULT_REJECTION_MESSAGE) }
    }
}

impl<L, K> RateLimitLayer<L, K> {
    /// Derive client keys with a different extractor.
    pub fn with_key<K2: KeyExtractor>(self, extractor: K2) -> RateLimitLayer<L, K2> {
        RateLimitLayer { limiter: self.limiter, extractor, message: self.message }
    }

    /// Override the `error` text of the 429 body.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Arc::from(message.into());
        self
    }
}

impl<S, L, K> Layer<S> for RateLimitLayer<L, K>
where
    L: RateLimiter + 'static,
    K: KeyExtractor,
{
    type Service = RateLimitService<S, L, K>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
            message: self.message.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
///
/// Admitted requests go to the inner service. Rejected requests are answered here with
/// `429 Too Many Requests` and a JSON body; the inner service never sees them. Store failures and
/// panics in the limiter resolve through its [`FailurePolicy`](crate::FailurePolicy) and never
/// become a 5xx.
pub struct RateLimitService<S, L, K = PeerIp> {
    inner: S,
    limiter: Arc<L>,
    extractor: K,
    message: Arc<str>,
}

impl<S: Clone, L, K: Clone> Clone for RateLimitService<S, L, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
            message: self.message.clone(),
        }
    }
}

impl<S: std::fmt::Debug, L, K: std::fmt::Debug> std::fmt::Debug for RateLimitService<S, L, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("extractor", &self.extractor)
            .finish()
    }
}

impl<S, L, K, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, L, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    L: RateLimiter + 'static,
    K: KeyExtractor,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();
        let message = self.message.clone();
        let key = self.extractor.extract(req.headers(), req.extensions());

        Box::pin(async move {
            let decision = match key {
                Some(key) => guarded_check(limiter.as_ref(), &key).await,
                None => {
                    tracing::debug!(
                        uri = %req.uri(),
                        "no client key derivable; admitting unchecked"
                    );
                    Decision::unchecked()
                }
            };

            match decision {
                Decision::Admitted { remaining } => {
                    let mut response = inner.call(req).await?;
                    if let Some(remaining) = remaining {
                        response
                            .headers_mut()
                            .insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
                    }
                    Ok(response)
                }
                Decision::Rejected { retry_after } => Ok(rejection(&message, retry_after)),
            }
        })
    }
}

async fn guarded_check<L>(limiter: &L, key: &str) -> Decision
where
    L: RateLimiter + ?Sized,
{
    match AssertUnwindSafe(limiter.check_and_consume(key)).catch_unwind().await {
        Ok(decision) => decision,
        Err(_) => {
            let policy = limiter.failure_policy();
            tracing::error!(key = %key, ?policy, "rate limiter panicked; applying failure policy");
            policy.fallback()
        }
    }
}

/// Build the `429` response: JSON `{"error": message}` plus `Retry-After` in whole seconds.
pub fn rejection<B: From<String>>(message: &str, retry_after: Duration) -> Response<B> {
    let body = serde_json::to_string(&ErrorBody { error: message })
        .unwrap_or_else(|_| String::from(r#"{"error":"rate limit exceeded"}"#));
    let mut response = Response::new(B::from(body));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    response
}

fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_shape() {
        let response: Response<String> = rejection("slow down", Duration::from_millis(5_500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[RETRY_AFTER], "6");
        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "slow down" }));
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::ZERO), 0);
        assert_eq!(retry_after_secs(Duration::from_secs(6)), 6);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
    }
}
