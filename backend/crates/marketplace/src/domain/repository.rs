//! Repository Traits
//!
//! Interfaces for data persistence. Implementation is in infrastructure layer.
//!
//! Every mutation of a transaction or download token is a single
//! conditional statement (status-guarded update, conditional increment,
//! upsert). Callers never read-modify-write.

use crate::domain::entities::{
    CheckoutSessionView, Completion, NewUser, Resource, TokenLookup, Transaction, UserAccount,
};
use crate::domain::value_objects::{Email, PaymentCapability, Purchaser, UserRole};
use crate::error::MarketResult;
use kernel::id::{DownloadTokenId, ResourceId, TransactionId, UserId};

/// User account repository trait
#[trait_variant::make(UserRepository: Send)]
pub trait LocalUserRepository {
    /// Find user by ID
    async fn find_user(&self, user_id: &UserId) -> MarketResult<Option<UserAccount>>;

    /// Find user by connected gateway account id
    async fn find_user_by_payment_account(
        &self,
        account_id: &str,
    ) -> MarketResult<Option<UserAccount>>;

    /// Persist capability flags and role
    async fn update_payment_capability(
        &self,
        user_id: &UserId,
        capability: PaymentCapability,
        role: UserRole,
    ) -> MarketResult<()>;

    /// Store a gateway customer id unless one is already set
    ///
    /// Returns the id that ends up stored, which is the existing one when a
    /// concurrent checkout won the race.
    async fn set_payment_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> MarketResult<String>;

    /// Check if email exists
    async fn email_exists(&self, email: &Email) -> MarketResult<bool>;

    /// Create a new user (`EmailTaken` on unique violation)
    async fn create_user(&self, user: &NewUser) -> MarketResult<()>;
}

/// Resource repository trait (read-only here)
#[trait_variant::make(ResourceRepository: Send)]
pub trait LocalResourceRepository {
    async fn find_resource(&self, resource_id: &ResourceId) -> MarketResult<Option<Resource>>;
}

/// Transaction ledger repository trait
#[trait_variant::make(TransactionRepository: Send)]
pub trait LocalTransactionRepository {
    /// Whether the purchaser already holds a COMPLETED transaction for the resource
    async fn has_completed_purchase(
        &self,
        purchaser: &Purchaser,
        resource_id: &ResourceId,
    ) -> MarketResult<bool>;

    /// Insert a new PENDING transaction
    async fn create_pending(&self, transaction: &Transaction) -> MarketResult<()>;

    /// Record the gateway checkout session opened for a transaction
    async fn attach_checkout_session(
        &self,
        transaction_id: &TransactionId,
        session_id: &str,
    ) -> MarketResult<()>;

    /// Find the PENDING transaction for a checkout session
    async fn find_pending_by_session(&self, session_id: &str) -> MarketResult<Option<Transaction>>;

    /// PENDING -> COMPLETED plus the grant, in one unit of work
    ///
    /// Returns `false` without writing anything when the transaction is no
    /// longer PENDING.
    async fn complete_transaction(&self, completion: &Completion) -> MarketResult<bool>;

    /// PENDING -> FAILED for one transaction of this purchaser and resource
    ///
    /// With `transaction_id` only that row may fail; without it, the most
    /// recent PENDING match does.
    async fn fail_pending(
        &self,
        purchaser: &Purchaser,
        resource_id: &ResourceId,
        transaction_id: Option<TransactionId>,
        payment_intent_id: &str,
    ) -> MarketResult<Option<TransactionId>>;

    /// Checkout session lookup scoped to the buyer
    async fn find_checkout_session(
        &self,
        session_id: &str,
        buyer_id: &UserId,
    ) -> MarketResult<Option<CheckoutSessionView>>;

    /// Reassign COMPLETED guest purchases to a new account and grant entitlements
    ///
    /// Returns the distinct resources linked.
    async fn link_guest_purchases(
        &self,
        email: &Email,
        user_id: &UserId,
    ) -> MarketResult<Vec<ResourceId>>;
}

/// Download rights repository trait
#[trait_variant::make(DownloadRepository: Send)]
pub trait LocalDownloadRepository {
    /// Token joined with its transaction status and resource
    async fn find_download_token(&self, token: &str) -> MarketResult<Option<TokenLookup>>;

    /// Spend one download unit if any remain; `false` when none did
    async fn consume_download(&self, token_id: &DownloadTokenId) -> MarketResult<bool>;

    async fn has_entitlement(&self, user_id: &UserId, resource_id: &ResourceId)
    -> MarketResult<bool>;

    /// Idempotent entitlement upsert
    async fn grant_entitlement(&self, user_id: &UserId, resource_id: &ResourceId)
    -> MarketResult<()>;
}

/// Everything the marketplace persists, behind one handle
pub trait MarketRepository:
    UserRepository
    + ResourceRepository
    + TransactionRepository
    + DownloadRepository
    + Send
    + Sync
    + 'static
{
}

impl<T> MarketRepository for T where
    T: UserRepository
        + ResourceRepository
        + TransactionRepository
        + DownloadRepository
        + Send
        + Sync
        + 'static
{
}
