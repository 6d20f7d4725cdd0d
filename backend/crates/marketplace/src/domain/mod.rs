//! Domain Layer
//!
//! Contains entities, value objects, gateway events, pure services,
//! repository traits and outbound ports.

pub mod entities;
pub mod events;
pub mod ports;
pub mod repository;
pub mod services;
pub mod value_objects;

// Re-exports
pub use entities::{Grant, Resource, Transaction, UserAccount};
pub use repository::MarketRepository;
pub use value_objects::{Email, Purchaser, TransactionStatus};
