//! Axum middleware enforcing a [`RateLimiter`]
//!
//! The criteria for a request come from an extractor closure, so the same
//! layer can throttle per user, per client or per factor. Requests the
//! extractor returns `None` for pass through untouched.
//!
//! ```rust,ignore
//! let throttle = ThrottleMiddleware::new(limiter, |req: &Request<Body>| {
//!     let user = req.headers().get("x-user-id")?.to_str().ok()?;
//!     Some(CounterCriteria::new(Reference::domain("acme"), user).with_factor("sms"))
//! });
//!
//! let app = Router::new()
//!     .route("/mfa/challenge", post(send_challenge))
//!     .layer(axum::middleware::from_fn_with_state(
//!         throttle,
//!         ThrottleMiddleware::<MemoryCounterStore>::middleware,
//!     ));
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::HeaderValue, HeaderName},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use super::rate_limit::RateLimiter;
use crate::criteria::CounterCriteria;
use crate::error::Error;
use crate::store::CounterStore;

type CriteriaExtractor = dyn Fn(&Request<Body>) -> Option<CounterCriteria> + Send + Sync;

/// Middleware state consuming one rate-limit token per request
pub struct ThrottleMiddleware<S> {
    limiter: RateLimiter<S>,
    extractor: Arc<CriteriaExtractor>,
}

impl<S> Clone for ThrottleMiddleware<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<S: CounterStore> ThrottleMiddleware<S> {
    /// Create the middleware from a limiter and a criteria extractor
    pub fn new<F>(limiter: RateLimiter<S>, extractor: F) -> Self
    where
        F: Fn(&Request<Body>) -> Option<CounterCriteria> + Send + Sync + 'static,
    {
        Self {
            limiter,
            extractor: Arc::new(extractor),
        }
    }

    /// Middleware function for `axum::middleware::from_fn_with_state`
    ///
    /// Denied requests get a 429 with `Retry-After`; allowed responses carry
    /// `x-ratelimit-remaining`.
    pub async fn middleware(
        State(throttle): State<Self>,
        request: Request<Body>,
        next: Next,
    ) -> Result<Response, Error> {
        let Some(criteria) = (throttle.extractor)(&request) else {
            debug!(path = %request.uri().path(), "No throttle criteria for request");
            return Ok(next.run(request).await);
        };

        let decision = throttle.limiter.try_consume_detailed(&criteria, Utc::now()).await?;
        if !decision.allowed {
            return Err(Error::RateLimitExceeded {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        let mut response = next.run(request).await;
        if let Some(remaining) = decision.tokens_left {
            if let Ok(value) = HeaderValue::from_str(&remaining.max(0).to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-ratelimit-remaining"), value);
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuardSettings, RateLimitSettings, TimeUnit};
    use crate::counter::{RefillStrategy, ThresholdEngine};
    use crate::criteria::Reference;
    use crate::store::MemoryCounterStore;
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn app(limit: i64) -> Router {
        let mut settings = GuardSettings::default();
        settings.rate_limit = RateLimitSettings {
            enabled: true,
            limit,
            time_period: 1,
            time_unit: TimeUnit::Minutes,
            refill: RefillStrategy::FixedWindow,
        };
        let limiter = RateLimiter::new(
            ThresholdEngine::new(Arc::new(MemoryCounterStore::new())),
            Arc::new(settings),
        );
        let throttle = ThrottleMiddleware::new(limiter, |req: &Request<Body>| {
            let user = req.headers().get("x-user-id")?.to_str().ok()?;
            Some(CounterCriteria::new(Reference::domain("acme"), user))
        });

        Router::new()
            .route("/challenge", get(|| async { "sent" }))
            .layer(axum::middleware::from_fn_with_state(
                throttle,
                ThrottleMiddleware::<MemoryCounterStore>::middleware,
            ))
    }

    fn request(user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/challenge");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_allows_within_limit() {
        let response = app(2).oneshot(request(Some("alice"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    }

    #[tokio::test]
    async fn test_rejects_over_limit_with_retry_after() {
        let app = app(1);
        let first = app.clone().oneshot(request(Some("alice"))).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request(Some("alice"))).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = second.headers()["retry-after"].to_str().unwrap().parse().unwrap();
        assert!(retry_after > 0 && retry_after <= 60);
    }

    #[tokio::test]
    async fn test_requests_without_criteria_pass() {
        let app = app(1);
        for _ in 0..3 {
            let response = app.clone().oneshot(request(None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
