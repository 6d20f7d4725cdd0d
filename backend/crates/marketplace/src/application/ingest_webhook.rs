//! Ingest Webhook Use Case
//!
//! Authenticates a payment gateway event and applies it to the ledger.
//! Duplicate and out-of-order deliveries are normal: every handler only
//! attempts PENDING -> terminal transitions and reports anything else as
//! an ignored outcome.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{TransactionId, UserId};

use crate::application::config::MarketConfig;
use crate::domain::entities::{Completion, DownloadToken, Grant, Transaction};
use crate::domain::events::{
    AccountPayload, CheckoutSessionPayload, GatewayEvent, ParsedEvent, PaymentIntentPayload,
    verify_signature,
};
use crate::domain::ports::{PurchaseConfirmation, PurchaseNotifier};
use crate::domain::repository::MarketRepository;
use crate::domain::services::{format_amount, sync_capability};
use crate::domain::value_objects::Purchaser;
use crate::error::{MarketError, MarketResult};

/// What a delivered event changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    CapabilitySynced { user_id: UserId },
    Completed { transaction_id: TransactionId },
    Failed { transaction_id: TransactionId },
    /// Accepted without writes (unknown type, duplicate, unpaid, ...)
    Ignored { reason: &'static str },
}

/// Ingest webhook use case
pub struct IngestWebhookUseCase<R, N>
where
    R: MarketRepository,
    N: PurchaseNotifier + Send + Sync + 'static,
{
    repo: Arc<R>,
    notifier: Arc<N>,
    config: Arc<MarketConfig>,
}

impl<R, N> IngestWebhookUseCase<R, N>
where
    R: MarketRepository,
    N: PurchaseNotifier + Send + Sync + 'static,
{
    pub fn new(repo: Arc<R>, notifier: Arc<N>, config: Arc<MarketConfig>) -> Self {
        Self {
            repo,
            notifier,
            config,
        }
    }

    /// Verify, parse and dispatch one delivery
    ///
    /// Signature problems fail before any storage access. Handler errors
    /// are wrapped in `WebhookHandlerFailed` so the gateway redelivers.
    pub async fn execute(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> MarketResult<WebhookOutcome> {
        let signature = signature.ok_or(MarketError::MissingSignature)?;
        verify_signature(
            signature,
            body,
            &self.config.webhook_secret,
            self.config.webhook_tolerance.as_secs() as i64,
            Utc::now().timestamp(),
        )?;

        let ParsedEvent { id, event } = ParsedEvent::parse(body)?;
        let event_type = event.event_type().to_string();

        let outcome = match event {
            GatewayEvent::AccountUpdated(account) => self.on_account_updated(account).await,
            GatewayEvent::CheckoutSessionCompleted(session) => {
                self.on_checkout_completed(session).await
            }
            GatewayEvent::PaymentIntentFailed(intent) => self.on_payment_failed(intent).await,
            GatewayEvent::Other { .. } => Ok(WebhookOutcome::Ignored {
                reason: "unhandled event type",
            }),
        }
        .map_err(|e| MarketError::WebhookHandlerFailed(Box::new(e)))?;

        match &outcome {
            WebhookOutcome::Ignored { reason } => {
                tracing::debug!(event_id = %id, event_type = %event_type, reason, "Webhook event ignored");
            }
            _ => {
                tracing::info!(event_id = %id, event_type = %event_type, outcome = ?outcome, "Webhook event applied");
            }
        }

        Ok(outcome)
    }

    async fn on_account_updated(&self, account: AccountPayload) -> MarketResult<WebhookOutcome> {
        let Some(user) = self.repo.find_user_by_payment_account(&account.id).await? else {
            return Ok(WebhookOutcome::Ignored {
                reason: "unknown payment account",
            });
        };

        let Some(change) = sync_capability(&user, &account) else {
            return Ok(WebhookOutcome::Ignored {
                reason: "capability unchanged",
            });
        };

        self.repo
            .update_payment_capability(&user.id, change.capability, change.role)
            .await?;

        if change.role != user.role {
            tracing::info!(user_id = %user.id, role = change.role.code(), "Seller role granted");
        }

        Ok(WebhookOutcome::CapabilitySynced { user_id: user.id })
    }

    async fn on_checkout_completed(
        &self,
        session: CheckoutSessionPayload,
    ) -> MarketResult<WebhookOutcome> {
        if !session.is_paid() {
            return Ok(WebhookOutcome::Ignored {
                reason: "session not paid",
            });
        }

        let Some(transaction) = self.repo.find_pending_by_session(&session.id).await? else {
            return Ok(WebhookOutcome::Ignored {
                reason: "no pending transaction for session",
            });
        };

        let grant = match &transaction.purchaser {
            Purchaser::Registered(user_id) => Grant::Entitlement {
                user_id: *user_id,
                resource_id: transaction.resource_id,
            },
            Purchaser::Guest(_) => Grant::Token(DownloadToken::issue(
                transaction.id,
                platform::crypto::random_token(self.config.download_token_bytes),
                self.config.guest_token_ttl(),
                self.config.guest_max_downloads,
            )),
        };

        let completion = Completion {
            transaction_id: transaction.id,
            payment_intent_id: session.payment_intent_id(),
            payment_method: session.payment_method(),
            grant,
        };

        // A concurrent duplicate delivery may have completed it first
        if !self.repo.complete_transaction(&completion).await? {
            return Ok(WebhookOutcome::Ignored {
                reason: "transaction already completed",
            });
        }

        match &completion.grant {
            Grant::Entitlement { user_id, .. } => {
                tracing::info!(transaction_id = %transaction.id, user_id = %user_id, "Purchase completed, entitlement granted");
            }
            Grant::Token(token) => {
                tracing::info!(transaction_id = %transaction.id, download_token_id = %token.id, "Guest purchase completed, download token issued");
            }
        }

        let download_token = match completion.grant {
            Grant::Token(token) => Some(token.token),
            Grant::Entitlement { .. } => None,
        };
        self.spawn_confirmation(transaction, download_token);

        Ok(WebhookOutcome::Completed {
            transaction_id: completion.transaction_id,
        })
    }

    async fn on_payment_failed(
        &self,
        intent: PaymentIntentPayload,
    ) -> MarketResult<WebhookOutcome> {
        let Some((purchaser, resource_id)) = intent.purchase_ref() else {
            return Ok(WebhookOutcome::Ignored {
                reason: "missing purchase metadata",
            });
        };

        match self
            .repo
            .fail_pending(&purchaser, &resource_id, intent.transaction_id(), &intent.id)
            .await?
        {
            Some(transaction_id) => {
                tracing::info!(transaction_id = %transaction_id, resource_id = %resource_id, "Payment failed, transaction closed");
                Ok(WebhookOutcome::Failed { transaction_id })
            }
            None => Ok(WebhookOutcome::Ignored {
                reason: "no pending transaction for payment",
            }),
        }
    }

    /// Send the confirmation mail off the request path
    fn spawn_confirmation(&self, transaction: Transaction, download_token: Option<String>) {
        let repo = self.repo.clone();
        let notifier = self.notifier.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) =
                send_confirmation(&*repo, &*notifier, &config, &transaction, download_token).await
            {
                tracing::warn!(transaction_id = %transaction.id, error = %e, "Purchase confirmation not sent");
            }
        });
    }
}

async fn send_confirmation<R, N>(
    repo: &R,
    notifier: &N,
    config: &MarketConfig,
    transaction: &Transaction,
    download_token: Option<String>,
) -> MarketResult<()>
where
    R: MarketRepository,
    N: PurchaseNotifier + Send + Sync + 'static,
{
    let resource = repo
        .find_resource(&transaction.resource_id)
        .await?
        .ok_or(MarketError::ResourceNotFound)?;

    let email = match &transaction.purchaser {
        Purchaser::Guest(email) => email.clone(),
        Purchaser::Registered(user_id) => {
            repo.find_user(user_id)
                .await?
                .ok_or(MarketError::NotFound)?
                .email
        }
    };

    let confirmation = PurchaseConfirmation {
        email,
        resource_title: resource.title,
        amount: transaction.amount,
        formatted_amount: format_amount(transaction.amount, &config.currency),
        is_guest: transaction.purchaser.is_guest(),
        download_token,
        locale: config.default_locale.clone(),
    };

    notifier
        .send_purchase_confirmation(&confirmation)
        .await
        .map_err(|e| MarketError::Internal(e.to_string()))
}
