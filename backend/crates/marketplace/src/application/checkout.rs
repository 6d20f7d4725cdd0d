//! Checkout Use Cases
//!
//! Opens a PENDING transaction plus a hosted gateway checkout session, and
//! looks sessions up again for the success page.

use std::sync::Arc;

use kernel::id::{ResourceId, TransactionId, UserId};

use crate::application::config::MarketConfig;
use crate::domain::entities::{Transaction, UserAccount};
use crate::domain::ports::{CheckoutRequest, PaymentGateway};
use crate::domain::repository::MarketRepository;
use crate::domain::services::{format_amount, split_fee};
use crate::domain::value_objects::{Email, Purchaser, TransactionStatus};
use crate::error::{MarketError, MarketResult};

/// Checkout input
pub struct CheckoutInput {
    /// Session identity, if signed in
    pub user_id: Option<UserId>,
    pub resource_id: String,
    /// Used only when not signed in
    pub guest_email: Option<String>,
}

/// Checkout output
#[derive(Debug)]
pub struct CheckoutOutput {
    pub transaction_id: TransactionId,
    pub session_id: String,
    pub checkout_url: String,
}

/// Checkout use case
pub struct CheckoutUseCase<R, G>
where
    R: MarketRepository,
    G: PaymentGateway + Send + Sync + 'static,
{
    repo: Arc<R>,
    gateway: Arc<G>,
    config: Arc<MarketConfig>,
}

impl<R, G> CheckoutUseCase<R, G>
where
    R: MarketRepository,
    G: PaymentGateway + Send + Sync + 'static,
{
    pub fn new(repo: Arc<R>, gateway: Arc<G>, config: Arc<MarketConfig>) -> Self {
        Self {
            repo,
            gateway,
            config,
        }
    }

    pub async fn execute(&self, input: CheckoutInput) -> MarketResult<CheckoutOutput> {
        // Who pays
        let purchaser = match (input.user_id, input.guest_email) {
            (Some(user_id), _) => Purchaser::Registered(user_id),
            (None, Some(email)) if !email.trim().is_empty() => Purchaser::Guest(Email::new(email)?),
            (None, _) => return Err(MarketError::Unauthenticated),
        };

        // What is bought
        let resource_id =
            ResourceId::parse(&input.resource_id).ok_or(MarketError::ResourceNotFound)?;
        let resource = self
            .repo
            .find_resource(&resource_id)
            .await?
            .ok_or(MarketError::ResourceNotFound)?;

        if !resource.is_listed() {
            return Err(MarketError::ResourceNotAvailable);
        }
        if purchaser.buyer_id() == Some(resource.seller_id) {
            return Err(MarketError::OwnResource);
        }
        if self
            .repo
            .has_completed_purchase(&purchaser, &resource.id)
            .await?
        {
            return Err(MarketError::AlreadyPurchased);
        }

        let seller = self
            .repo
            .find_user(&resource.seller_id)
            .await?
            .filter(UserAccount::can_accept_payments)
            .ok_or(MarketError::SellerNotPayable)?;
        let seller_account_id = seller
            .payment_account_id
            .ok_or(MarketError::SellerNotPayable)?;

        if resource.is_free() {
            return Err(MarketError::FreeResource);
        }

        let customer_id = match &purchaser {
            Purchaser::Registered(user_id) => Some(self.resolve_customer(user_id).await?),
            Purchaser::Guest(_) => None,
        };

        let split = split_fee(resource.price_minor, self.config.platform_fee_bps);
        let transaction = Transaction::pending(purchaser.clone(), resource.id, split);
        self.repo.create_pending(&transaction).await?;

        let request = CheckoutRequest {
            transaction_id: transaction.id,
            resource_id: resource.id,
            resource_title: resource.title.clone(),
            amount: split.amount,
            platform_fee: split.platform_fee,
            currency: self.config.currency.clone(),
            purchaser,
            customer_id,
            seller_account_id,
            success_url: self.config.checkout_success_url(),
            cancel_url: self.config.checkout_cancel_url(&resource.id),
        };

        let session = self
            .gateway
            .create_checkout_session(&request)
            .await
            .map_err(|e| {
                tracing::error!(transaction_id = %transaction.id, error = %e, "Checkout session creation failed");
                MarketError::from(e)
            })?;

        self.repo
            .attach_checkout_session(&transaction.id, &session.id)
            .await?;

        tracing::info!(
            transaction_id = %transaction.id,
            resource_id = %resource.id,
            amount = split.amount,
            platform_fee = split.platform_fee,
            guest = transaction.purchaser.is_guest(),
            "Checkout session opened"
        );

        Ok(CheckoutOutput {
            transaction_id: transaction.id,
            session_id: session.id,
            checkout_url: session.url,
        })
    }

    /// Reuse the buyer's gateway customer or create exactly one
    async fn resolve_customer(&self, user_id: &UserId) -> MarketResult<String> {
        let buyer = self
            .repo
            .find_user(user_id)
            .await?
            .ok_or(MarketError::Unauthenticated)?;

        if let Some(customer_id) = buyer.payment_customer_id {
            return Ok(customer_id);
        }

        let created = self.gateway.create_customer(&buyer.email, user_id).await?;
        let stored = self
            .repo
            .set_payment_customer_id(user_id, &created)
            .await?;

        if stored != created {
            tracing::warn!(user_id = %user_id, "Concurrent checkout already stored a customer, reusing it");
        }
        Ok(stored)
    }
}

// ============================================================================
// Checkout session lookup
// ============================================================================

/// Checkout session summary
#[derive(Debug)]
pub struct CheckoutSessionOutput {
    pub transaction_id: TransactionId,
    pub session_id: String,
    pub amount: i64,
    pub formatted_amount: String,
    pub status: TransactionStatus,
    pub resource_id: ResourceId,
    pub resource_title: String,
}

/// Checkout session lookup use case
pub struct CheckoutSessionUseCase<R>
where
    R: MarketRepository,
{
    repo: Arc<R>,
    config: Arc<MarketConfig>,
}

impl<R> CheckoutSessionUseCase<R>
where
    R: MarketRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<MarketConfig>) -> Self {
        Self { repo, config }
    }

    /// Only the buyer's own sessions are visible
    pub async fn execute(
        &self,
        user_id: Option<UserId>,
        session_id: &str,
    ) -> MarketResult<CheckoutSessionOutput> {
        let user_id = user_id.ok_or(MarketError::Unauthenticated)?;

        let view = self
            .repo
            .find_checkout_session(session_id, &user_id)
            .await?
            .ok_or(MarketError::NotFound)?;

        let transaction = view.transaction;
        Ok(CheckoutSessionOutput {
            transaction_id: transaction.id,
            session_id: session_id.to_string(),
            amount: transaction.amount,
            formatted_amount: format_amount(transaction.amount, &self.config.currency),
            status: transaction.status,
            resource_id: transaction.resource_id,
            resource_title: view.resource_title,
        })
    }
}
