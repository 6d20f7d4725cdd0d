//! Presentation Layer
//!
//! HTTP handlers, DTOs, router, and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use handlers::{MarketAppState, MarketDeps};
pub use middleware::{RouteClass, rate_limit};
pub use router::{PgMarketDeps, marketplace_router, marketplace_router_generic};
