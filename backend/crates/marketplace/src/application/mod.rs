//! Application Layer
//!
//! Use cases and application services.

pub mod checkout;
pub mod config;
pub mod download;
pub mod file_delivery;
pub mod ingest_webhook;
pub mod register;

// Re-exports
pub use checkout::{
    CheckoutInput, CheckoutOutput, CheckoutSessionOutput, CheckoutSessionUseCase, CheckoutUseCase,
};
pub use config::{MarketConfig, RateLimits};
pub use download::{DownloadResourceUseCase, DownloadWithTokenUseCase};
pub use file_delivery::FileDelivery;
pub use ingest_webhook::{IngestWebhookUseCase, WebhookOutcome};
pub use register::{LinkGuestPurchasesUseCase, RegisterInput, RegisterOutput, RegisterUseCase};
