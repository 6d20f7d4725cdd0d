//! Infrastructure Layer
//!
//! PostgreSQL repository, payment gateway client, blob stores and notifiers.

pub mod blob;
pub mod notifier;
pub mod postgres;
pub mod stripe;

pub use blob::{AnyBlobStore, FsBlobStore, SignedUrlBlobStore};
pub use notifier::{HttpMailNotifier, LoggingNotifier, Notifier};
pub use postgres::PgMarketRepository;
pub use stripe::StripeGateway;
