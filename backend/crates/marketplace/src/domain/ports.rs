//! Outbound Ports
//!
//! Collaborators outside the database: the payment gateway, the purchase
//! confirmation mailer, and the file blob store.

use crate::domain::value_objects::{Email, Purchaser};
use crate::error::MarketError;
use kernel::id::{ResourceId, TransactionId, UserId};
use std::time::Duration;

// ============================================================================
// Payment gateway
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl From<GatewayError> for MarketError {
    fn from(err: GatewayError) -> Self {
        MarketError::PaymentGateway(err.to_string())
    }
}

/// Hosted checkout session to open at the gateway
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub transaction_id: TransactionId,
    pub resource_id: ResourceId,
    pub resource_title: String,
    pub amount: i64,
    pub platform_fee: i64,
    pub currency: String,
    pub purchaser: Purchaser,
    /// Reused customer record (registered buyers)
    pub customer_id: Option<String>,
    /// Connected account receiving the payout
    pub seller_account_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[trait_variant::make(PaymentGateway: Send)]
pub trait LocalPaymentGateway {
    /// Create a customer record; returns its id
    async fn create_customer(&self, email: &Email, user_id: &UserId)
    -> Result<String, GatewayError>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;
}

// ============================================================================
// Purchase notifier
// ============================================================================

#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Contents of the purchase confirmation mail
#[derive(Debug, Clone)]
pub struct PurchaseConfirmation {
    pub email: Email,
    pub resource_title: String,
    pub amount: i64,
    pub formatted_amount: String,
    /// Guest purchases only; a secret, never logged
    pub download_token: Option<String>,
    pub is_guest: bool,
    pub locale: String,
}

#[trait_variant::make(PurchaseNotifier: Send)]
pub trait LocalPurchaseNotifier {
    async fn send_purchase_confirmation(
        &self,
        confirmation: &PurchaseConfirmation,
    ) -> Result<(), NotifyError>;
}

// ============================================================================
// Blob store
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote storage error: {0}")]
    Remote(String),
}

impl From<StorageError> for MarketError {
    fn from(err: StorageError) -> Self {
        MarketError::Storage(err.to_string())
    }
}

#[trait_variant::make(BlobStore: Send)]
pub trait LocalBlobStore {
    /// Files are served from this process rather than by redirect
    fn is_local(&self) -> bool;

    /// Short-lived URL granting read access to `key`
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// File bytes, `None` when the key does not exist
    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
