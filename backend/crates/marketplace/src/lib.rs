//! Marketplace Backend Module
//!
//! Purchase fulfillment and download authorization for paid teaching
//! materials.
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, value objects, gateway events, repository and port traits
//! - `application/` - Use cases (one per operation)
//! - `infra/` - PostgreSQL repository, payment gateway client, blob stores, notifiers
//! - `presentation/` - HTTP handlers, DTOs, rate limiting middleware, router
//!
//! ## Consistency Model
//! - Transactions only move PENDING -> COMPLETED | FAILED, guarded in SQL
//! - Completion and entitlement/token issuance commit in one database transaction
//! - Guest download quota is consumed by a single conditional UPDATE
//! - Purchase confirmation mail is sent on a detached task after commit

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

pub use application::config::MarketConfig;
pub use error::{MarketError, MarketResult};
pub use infra::postgres::PgMarketRepository;
pub use presentation::handlers::{MarketAppState, MarketDeps};
pub use presentation::router::{PgMarketDeps, marketplace_router};

pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

#[cfg(test)]
mod tests;
