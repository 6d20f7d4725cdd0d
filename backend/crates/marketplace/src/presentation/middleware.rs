//! Rate Limiting Middleware
//!
//! Fixed-window limit per route class and client, applied before the
//! handler runs.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use platform::client::client_key;
use platform::rate_limit::{RateLimitConfig, RateLimitStore};
use std::net::SocketAddr;

use crate::application::config::RateLimits;
use crate::error::MarketError;
use crate::presentation::handlers::{MarketAppState, MarketDeps};

/// Groups of routes sharing one limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Registration,
    Checkout,
    Download,
    CheckoutSession,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Registration => "registration",
            RouteClass::Checkout => "checkout",
            RouteClass::Download => "download",
            RouteClass::CheckoutSession => "checkout_session",
        }
    }

    pub fn limit(&self, limits: &RateLimits) -> RateLimitConfig {
        match self {
            RouteClass::Registration => limits.registration,
            RouteClass::Checkout => limits.checkout,
            RouteClass::Download => limits.download,
            RouteClass::CheckoutSession => limits.checkout_session,
        }
    }
}

/// Middleware that rejects over-limit clients with 429
///
/// A failing limiter backend lets the request through.
pub async fn rate_limit<D: MarketDeps>(
    State((state, class)): State<(MarketAppState<D>, RouteClass)>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let direct_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let key = format!("{}:{}", class.as_str(), client_key(req.headers(), direct_ip));
    let limit = class.limit(&state.config.rate_limits);

    match state.limiter.check_and_increment(&key, &limit).await {
        Ok(result) if !result.allowed => {
            tracing::warn!(route_class = class.as_str(), client = %key, "Rate limit exceeded");
            return MarketError::RateLimited {
                retry_after_secs: result.retry_after.as_secs(),
            }
            .into_response();
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, route_class = class.as_str(), "Rate limiter unavailable, allowing request");
        }
    }

    next.run(req).await
}
