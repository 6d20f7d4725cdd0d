//! Marketplace Router

use axum::{
    Router, middleware,
    routing::{get, post},
};
use platform::rate_limit::MemoryRateLimitStore;

use crate::infra::{AnyBlobStore, Notifier, PgMarketRepository, StripeGateway};
use crate::presentation::handlers::{self, MarketAppState, MarketDeps};
use crate::presentation::middleware::{RouteClass, rate_limit};

/// Production collaborators
pub struct PgMarketDeps;

impl MarketDeps for PgMarketDeps {
    type Repo = PgMarketRepository;
    type Gateway = StripeGateway;
    type Notifier = Notifier;
    type Blobs = AnyBlobStore;
    type Limiter = MemoryRateLimitStore;
}

/// Create the Marketplace router with PostgreSQL repository
pub fn marketplace_router(state: MarketAppState<PgMarketDeps>) -> Router {
    marketplace_router_generic(state)
}

/// Create a generic Marketplace router for any collaborator set
///
/// The webhook route is not rate limited: the gateway's redelivery must
/// always reach it.
pub fn marketplace_router_generic<D: MarketDeps>(state: MarketAppState<D>) -> Router {
    let limited = |class: RouteClass| {
        middleware::from_fn_with_state((state.clone(), class), rate_limit::<D>)
    };

    Router::new()
        .route("/webhooks/payments", post(handlers::payment_webhook::<D>))
        .route(
            "/download/{token}",
            get(handlers::download_with_token::<D>).layer(limited(RouteClass::Download)),
        )
        .route(
            "/resources/{resource_id}/download",
            get(handlers::download_resource::<D>).layer(limited(RouteClass::Download)),
        )
        .route(
            "/checkout",
            post(handlers::checkout::<D>).layer(limited(RouteClass::Checkout)),
        )
        .route(
            "/checkout-session/{session_id}",
            get(handlers::checkout_session::<D>).layer(limited(RouteClass::CheckoutSession)),
        )
        .route(
            "/auth/register",
            post(handlers::register::<D>).layer(limited(RouteClass::Registration)),
        )
        .with_state(state)
}
