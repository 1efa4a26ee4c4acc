/* src/middleware.rs */

use axum::{
    extract::Request,
    http,
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::ApiError;
use crate::extractor::{HeaderMap, rate_limit_key};
use crate::ratelimit::RateLimiter;

/// Layer that rejects requests over the per-client limit before they reach
/// the handler.
///
/// The client key comes from [`rate_limit_key`]. Rejected requests get a
/// `429` with `Retry-After`; the inner service is not called.
///
/// # Examples
///
/// ```rust,no_run
/// use axum::{Router, routing::get};
/// use myip::{RateLimitLayer, RateLimiter};
/// use std::sync::Arc;
///
/// let limiter = Arc::new(RateLimiter::default());
/// let app: Router = Router::new()
///     .route("/", get(|| async { "ok" }).route_layer(RateLimitLayer::new(limiter)));
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let headers = headers_to_map(req.headers());
        let key = rate_limit_key(&headers);
        let decision = self.limiter.check(key);

        if !decision.allowed {
            debug!(key, retry_after = decision.retry_after, "Rejected rate limited request");
            let response = ApiError::RateLimited {
                retry_after: decision.retry_after,
            }
            .into_response();
            return Box::pin(async move { Ok(response) });
        }

        Box::pin(self.inner.call(req))
    }
}

/// Convert Axum headers to our internal header map format.
///
/// Values that are not visible ASCII are skipped. Repeated headers are joined
/// with `", "` so a split `X-Forwarded-For` reads as one chain.
pub fn headers_to_map(headers: &http::HeaderMap) -> HeaderMap {
    let mut map = HeaderMap::new();

    for (name, value) in headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    map
}
