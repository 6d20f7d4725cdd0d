//! Domain Entities
//!
//! Core business entities for purchase fulfillment and download authorization.

use crate::domain::value_objects::{
    Email, FeeSplit, PaymentCapability, Purchaser, TransactionStatus, UserRole,
};
use chrono::{DateTime, Duration, Utc};
use kernel::id::{DownloadTokenId, ResourceId, TransactionId, UserId};

/// Account as seen by the marketplace (buyer, seller, or admin)
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: UserId,
    pub email: Email,
    pub display_name: Option<String>,
    pub role: UserRole,
    /// Connected gateway account (sellers)
    pub payment_account_id: Option<String>,
    /// Gateway customer record (buyers), reused across purchases
    pub payment_customer_id: Option<String>,
    pub capability: PaymentCapability,
}

impl UserAccount {
    /// Seller can receive money for a sale
    pub fn can_accept_payments(&self) -> bool {
        self.payment_account_id.is_some() && self.capability.charges_enabled
    }
}

/// Account to be created at registration
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: UserId,
    pub email: Email,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub role: UserRole,
}

/// Purchasable teaching material (only the fields this subsystem reads)
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub seller_id: UserId,
    pub title: String,
    pub price_minor: i64,
    pub is_published: bool,
    pub is_approved: bool,
    pub file_key: String,
    pub content_type: String,
}

impl Resource {
    pub fn is_listed(&self) -> bool {
        self.is_published && self.is_approved
    }

    pub fn is_free(&self) -> bool {
        self.price_minor == 0
    }
}

/// One purchase attempt
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub purchaser: Purchaser,
    pub resource_id: ResourceId,
    pub amount: i64,
    pub platform_fee: i64,
    pub seller_payout: i64,
    pub status: TransactionStatus,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new PENDING transaction
    pub fn pending(purchaser: Purchaser, resource_id: ResourceId, split: FeeSplit) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            purchaser,
            resource_id,
            amount: split.amount,
            platform_fee: split.platform_fee,
            seller_payout: split.seller_payout,
            status: TransactionStatus::Pending,
            checkout_session_id: None,
            payment_intent_id: None,
            payment_method: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Time- and count-bounded download right for a guest purchase
#[derive(Debug, Clone)]
pub struct DownloadToken {
    pub id: DownloadTokenId,
    /// External-facing secret; never logged
    pub token: String,
    pub transaction_id: TransactionId,
    pub expires_at: DateTime<Utc>,
    pub download_count: i32,
    pub max_downloads: i32,
    pub created_at: DateTime<Utc>,
}

impl DownloadToken {
    pub fn issue(
        transaction_id: TransactionId,
        token: String,
        ttl: Duration,
        max_downloads: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DownloadTokenId::new(),
            token,
            transaction_id,
            expires_at: now + ttl,
            download_count: 0,
            max_downloads,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.download_count >= self.max_downloads
    }

    pub fn remaining(&self) -> i32 {
        (self.max_downloads - self.download_count).max(0)
    }
}

/// A download token joined with its transaction state and resource
#[derive(Debug, Clone)]
pub struct TokenLookup {
    pub token: DownloadToken,
    pub transaction_status: TransactionStatus,
    pub resource: Resource,
}

/// What a completed transaction grants
#[derive(Debug, Clone)]
pub enum Grant {
    /// Permanent, unlimited re-download for a registered buyer
    Entitlement {
        user_id: UserId,
        resource_id: ResourceId,
    },
    /// Bounded token for a guest buyer
    Token(DownloadToken),
}

/// Everything written when a PENDING transaction completes
#[derive(Debug, Clone)]
pub struct Completion {
    pub transaction_id: TransactionId,
    pub payment_intent_id: Option<String>,
    pub payment_method: Option<String>,
    pub grant: Grant,
}

/// Checkout session lookup result, scoped to the buyer
#[derive(Debug, Clone)]
pub struct CheckoutSessionView {
    pub transaction: Transaction,
    pub resource_title: String,
}
