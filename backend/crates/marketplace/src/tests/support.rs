//! In-memory collaborators and fixtures
//!
//! `MemoryMarket` mirrors the SQL semantics of `PgMarketRepository`:
//! status-guarded transitions and the conditional download increment run
//! under one lock acquisition each.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kernel::id::{DownloadTokenId, ResourceId, TransactionId, UserId};
use platform::crypto::{hmac_sha256, to_hex};
use platform::rate_limit::MemoryRateLimitStore;
use serde_json::json;
use tokio::sync::Mutex;

use crate::application::IngestWebhookUseCase;
use crate::application::config::MarketConfig;
use crate::domain::entities::{
    CheckoutSessionView, Completion, DownloadToken, Grant, NewUser, Resource, TokenLookup,
    Transaction, UserAccount,
};
use crate::domain::ports::{
    BlobStore, CheckoutRequest, CheckoutSession, GatewayError, NotifyError, PaymentGateway,
    PurchaseConfirmation, PurchaseNotifier, StorageError,
};
use crate::domain::repository::{
    DownloadRepository, ResourceRepository, TransactionRepository, UserRepository,
};
use crate::domain::value_objects::{
    Email, PaymentCapability, Purchaser, TransactionStatus, UserRole,
};
use crate::error::{MarketError, MarketResult};
use crate::presentation::handlers::{MarketAppState, MarketDeps};

pub const WEBHOOK_SECRET: &[u8] = b"whsec_test_secret";
pub const SESSION_SECRET: [u8; 32] = [42u8; 32];

// ============================================================================
// Repository
// ============================================================================

#[derive(Default)]
pub struct MemoryState {
    pub users: HashMap<UserId, UserAccount>,
    pub resources: HashMap<ResourceId, Resource>,
    pub transactions: Vec<Transaction>,
    pub entitlements: HashSet<(UserId, ResourceId)>,
    pub tokens: Vec<DownloadToken>,
    /// Count of mutating statements that changed something
    pub writes: usize,
}

#[derive(Default)]
pub struct MemoryMarket {
    pub state: Mutex<MemoryState>,
    /// Make reads used by webhook handlers fail
    pub broken: AtomicBool,
    /// Make guest linking fail
    pub linking_broken: AtomicBool,
}

impl MemoryMarket {
    fn guard(&self) -> MarketResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(MarketError::Internal("database unreachable".into()));
        }
        Ok(())
    }

    pub async fn insert_user(&self, user: UserAccount) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_resource(&self, resource: Resource) {
        self.state.lock().await.resources.insert(resource.id, resource);
    }

    pub async fn insert_transaction(&self, transaction: Transaction) {
        self.state.lock().await.transactions.push(transaction);
    }

    pub async fn replace_transaction(&self, transaction: Transaction) {
        let mut state = self.state.lock().await;
        if let Some(slot) = state.transactions.iter_mut().find(|t| t.id == transaction.id) {
            *slot = transaction;
        }
    }

    pub async fn insert_token(&self, token: DownloadToken) {
        self.state.lock().await.tokens.push(token);
    }

    pub async fn transaction(&self, id: &TransactionId) -> Transaction {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .find(|t| t.id == *id)
            .cloned()
            .expect("transaction exists")
    }

    pub async fn tokens_for(&self, id: &TransactionId) -> Vec<DownloadToken> {
        self.state
            .lock()
            .await
            .tokens
            .iter()
            .filter(|t| t.transaction_id == *id)
            .cloned()
            .collect()
    }

    pub async fn entitlement_count(&self) -> usize {
        self.state.lock().await.entitlements.len()
    }

    pub async fn writes(&self) -> usize {
        self.state.lock().await.writes
    }

    pub async fn user_by_email(&self, email: &str) -> Option<UserAccount> {
        self.state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email.as_str() == email)
            .cloned()
    }
}

impl UserRepository for MemoryMarket {
    async fn find_user(&self, user_id: &UserId) -> MarketResult<Option<UserAccount>> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn find_user_by_payment_account(
        &self,
        account_id: &str,
    ) -> MarketResult<Option<UserAccount>> {
        self.guard()?;
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.payment_account_id.as_deref() == Some(account_id))
            .cloned())
    }

    async fn update_payment_capability(
        &self,
        user_id: &UserId,
        capability: PaymentCapability,
        role: UserRole,
    ) -> MarketResult<()> {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get_mut(user_id) {
            user.capability = capability;
            user.role = role;
            state.writes += 1;
        }
        Ok(())
    }

    async fn set_payment_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> MarketResult<String> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| MarketError::Internal("user vanished".into()))?;
        let stored = user
            .payment_customer_id
            .get_or_insert_with(|| customer_id.to_string())
            .clone();
        Ok(stored)
    }

    async fn email_exists(&self, email: &Email) -> MarketResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .any(|u| u.email == *email))
    }

    async fn create_user(&self, user: &NewUser) -> MarketResult<()> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(MarketError::EmailTaken);
        }
        state.users.insert(
            user.id,
            UserAccount {
                id: user.id,
                email: user.email.clone(),
                display_name: user.display_name.clone(),
                role: user.role,
                payment_account_id: None,
                payment_customer_id: None,
                capability: PaymentCapability::default(),
            },
        );
        state.writes += 1;
        Ok(())
    }
}

impl ResourceRepository for MemoryMarket {
    async fn find_resource(&self, resource_id: &ResourceId) -> MarketResult<Option<Resource>> {
        Ok(self.state.lock().await.resources.get(resource_id).cloned())
    }
}

impl TransactionRepository for MemoryMarket {
    async fn has_completed_purchase(
        &self,
        purchaser: &Purchaser,
        resource_id: &ResourceId,
    ) -> MarketResult<bool> {
        let state = self.state.lock().await;
        let account_of_guest = purchaser.guest_email().and_then(|email| {
            state
                .users
                .values()
                .find(|u| u.email == *email)
                .map(|u| Purchaser::Registered(u.id))
        });
        Ok(state.transactions.iter().any(|t| {
            (t.purchaser == *purchaser || Some(&t.purchaser) == account_of_guest.as_ref())
                && t.resource_id == *resource_id
                && t.status == TransactionStatus::Completed
        }))
    }

    async fn create_pending(&self, transaction: &Transaction) -> MarketResult<()> {
        let mut state = self.state.lock().await;
        state.transactions.push(transaction.clone());
        state.writes += 1;
        Ok(())
    }

    async fn attach_checkout_session(
        &self,
        transaction_id: &TransactionId,
        session_id: &str,
    ) -> MarketResult<()> {
        let mut state = self.state.lock().await;
        if let Some(t) = state.transactions.iter_mut().find(|t| t.id == *transaction_id) {
            t.checkout_session_id = Some(session_id.to_string());
            state.writes += 1;
        }
        Ok(())
    }

    async fn find_pending_by_session(&self, session_id: &str) -> MarketResult<Option<Transaction>> {
        self.guard()?;
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .find(|t| {
                t.checkout_session_id.as_deref() == Some(session_id)
                    && t.status == TransactionStatus::Pending
            })
            .cloned())
    }

    async fn complete_transaction(&self, completion: &Completion) -> MarketResult<bool> {
        let mut state = self.state.lock().await;
        let Some(t) = state.transactions.iter_mut().find(|t| {
            t.id == completion.transaction_id && t.status == TransactionStatus::Pending
        }) else {
            return Ok(false);
        };

        t.status = TransactionStatus::Completed;
        if completion.payment_intent_id.is_some() {
            t.payment_intent_id = completion.payment_intent_id.clone();
        }
        if completion.payment_method.is_some() {
            t.payment_method = completion.payment_method.clone();
        }
        t.updated_at = Utc::now();

        match &completion.grant {
            Grant::Entitlement {
                user_id,
                resource_id,
            } => {
                state.entitlements.insert((*user_id, *resource_id));
            }
            Grant::Token(token) => state.tokens.push(token.clone()),
        }
        state.writes += 1;
        Ok(true)
    }

    async fn fail_pending(
        &self,
        purchaser: &Purchaser,
        resource_id: &ResourceId,
        transaction_id: Option<TransactionId>,
        payment_intent_id: &str,
    ) -> MarketResult<Option<TransactionId>> {
        // One lock serializes deliveries here; the SQL version relies on the
        // row lock plus the status re-check for the same outcome.
        let mut state = self.state.lock().await;
        let latest = state
            .transactions
            .iter_mut()
            .filter(|t| {
                t.purchaser == *purchaser
                    && t.resource_id == *resource_id
                    && t.status == TransactionStatus::Pending
                    && transaction_id.is_none_or(|id| t.id == id)
            })
            .max_by_key(|t| t.created_at);

        let Some(t) = latest else {
            return Ok(None);
        };
        t.status = TransactionStatus::Failed;
        t.payment_intent_id = Some(payment_intent_id.to_string());
        let id = t.id;
        state.writes += 1;
        Ok(Some(id))
    }

    async fn find_checkout_session(
        &self,
        session_id: &str,
        buyer_id: &UserId,
    ) -> MarketResult<Option<CheckoutSessionView>> {
        let state = self.state.lock().await;
        let Some(transaction) = state.transactions.iter().find(|t| {
            t.checkout_session_id.as_deref() == Some(session_id)
                && t.purchaser.buyer_id() == Some(*buyer_id)
        }) else {
            return Ok(None);
        };
        let resource_title = state
            .resources
            .get(&transaction.resource_id)
            .map(|r| r.title.clone())
            .unwrap_or_default();
        Ok(Some(CheckoutSessionView {
            transaction: transaction.clone(),
            resource_title,
        }))
    }

    async fn link_guest_purchases(
        &self,
        email: &Email,
        user_id: &UserId,
    ) -> MarketResult<Vec<ResourceId>> {
        if self.linking_broken.load(Ordering::SeqCst) {
            return Err(MarketError::Internal("linking failed".into()));
        }

        let mut state = self.state.lock().await;
        let guest = Purchaser::Guest(email.clone());
        let mut linked = Vec::new();
        for t in state.transactions.iter_mut() {
            if t.purchaser == guest && t.status == TransactionStatus::Completed {
                t.purchaser = Purchaser::Registered(*user_id);
                linked.push(t.resource_id);
            }
        }
        linked.sort();
        linked.dedup();

        if !linked.is_empty() {
            for resource_id in &linked {
                state.entitlements.insert((*user_id, *resource_id));
            }
            state.writes += 1;
        }
        Ok(linked)
    }
}

impl DownloadRepository for MemoryMarket {
    async fn find_download_token(&self, token: &str) -> MarketResult<Option<TokenLookup>> {
        let state = self.state.lock().await;
        let Some(token) = state.tokens.iter().find(|t| t.token == token) else {
            return Ok(None);
        };
        let Some(transaction) = state
            .transactions
            .iter()
            .find(|t| t.id == token.transaction_id)
        else {
            return Ok(None);
        };
        let Some(resource) = state.resources.get(&transaction.resource_id) else {
            return Ok(None);
        };
        Ok(Some(TokenLookup {
            token: token.clone(),
            transaction_status: transaction.status,
            resource: resource.clone(),
        }))
    }

    async fn consume_download(&self, token_id: &DownloadTokenId) -> MarketResult<bool> {
        let mut state = self.state.lock().await;
        let Some(token) = state.tokens.iter_mut().find(|t| t.id == *token_id) else {
            return Ok(false);
        };
        if token.download_count >= token.max_downloads {
            return Ok(false);
        }
        token.download_count += 1;
        state.writes += 1;
        Ok(true)
    }

    async fn has_entitlement(
        &self,
        user_id: &UserId,
        resource_id: &ResourceId,
    ) -> MarketResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .entitlements
            .contains(&(*user_id, *resource_id)))
    }

    async fn grant_entitlement(
        &self,
        user_id: &UserId,
        resource_id: &ResourceId,
    ) -> MarketResult<()> {
        let mut state = self.state.lock().await;
        if state.entitlements.insert((*user_id, *resource_id)) {
            state.writes += 1;
        }
        Ok(())
    }
}

// ============================================================================
// Gateway, notifier, blobs
// ============================================================================

#[derive(Default)]
pub struct FakeGateway {
    pub fail: AtomicBool,
    pub customers_created: AtomicUsize,
    pub sessions: Mutex<Vec<CheckoutRequest>>,
}

impl PaymentGateway for FakeGateway {
    async fn create_customer(
        &self,
        _email: &Email,
        _user_id: &UserId,
    ) -> Result<String, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        let n = self.customers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cus_test_{n}"))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                message: "api_error".into(),
            });
        }
        let mut sessions = self.sessions.lock().await;
        sessions.push(request.clone());
        let id = format!("cs_test_{}", sessions.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.example.test/pay/{id}"),
            id,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<PurchaseConfirmation>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    /// Wait for the detached send task
    pub async fn wait_for(&self, count: usize) -> Vec<PurchaseConfirmation> {
        for _ in 0..100 {
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent.lock().await.clone()
    }
}

impl PurchaseNotifier for RecordingNotifier {
    async fn send_purchase_confirmation(
        &self,
        confirmation: &PurchaseConfirmation,
    ) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("smtp down".into()));
        }
        self.sent.lock().await.push(confirmation.clone());
        Ok(())
    }
}

pub struct MemoryBlobStore {
    pub local: bool,
    pub files: HashMap<String, Vec<u8>>,
}

impl BlobStore for MemoryBlobStore {
    fn is_local(&self) -> bool {
        self.local
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "https://cdn.example.test/{key}?expires_in={}",
            ttl.as_secs()
        ))
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.files.get(key).cloned())
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

pub struct TestDeps;

impl MarketDeps for TestDeps {
    type Repo = MemoryMarket;
    type Gateway = FakeGateway;
    type Notifier = RecordingNotifier;
    type Blobs = MemoryBlobStore;
    type Limiter = MemoryRateLimitStore;
}

// ============================================================================
// Fixtures
// ============================================================================

pub const FILE_KEY: &str = "resources/bruchrechnen.pdf";
pub const FILE_BYTES: &[u8] = b"%PDF-1.7 bruchrechnen";

pub fn test_config() -> MarketConfig {
    MarketConfig {
        webhook_secret: WEBHOOK_SECRET.to_vec(),
        session_secret: SESSION_SECRET,
        app_base_url: "https://lehrmittel.example.test".into(),
        ..MarketConfig::default()
    }
}

pub fn user(email: &str, role: UserRole) -> UserAccount {
    UserAccount {
        id: UserId::new(),
        email: Email::from_db(email),
        display_name: None,
        role,
        payment_account_id: None,
        payment_customer_id: None,
        capability: PaymentCapability::default(),
    }
}

pub fn resource(seller: &UserAccount, price_minor: i64) -> Resource {
    Resource {
        id: ResourceId::new(),
        seller_id: seller.id,
        title: "Bruchrechnen Werkstatt".into(),
        price_minor,
        is_published: true,
        is_approved: true,
        file_key: FILE_KEY.into(),
        content_type: "application/pdf".into(),
    }
}

pub struct Harness {
    pub state: MarketAppState<TestDeps>,
    pub seller: UserAccount,
    pub resource: Resource,
}

impl Harness {
    /// Payable seller and a listed 990 resource, local file present
    pub async fn new() -> Self {
        Self::with_blobs(true, true).await
    }

    pub async fn with_blobs(local: bool, file_present: bool) -> Self {
        Self::build(test_config(), local, file_present).await
    }

    pub async fn with_config(config: MarketConfig) -> Self {
        Self::build(config, true, true).await
    }

    async fn build(config: MarketConfig, local: bool, file_present: bool) -> Self {
        let mut files = HashMap::new();
        if file_present {
            files.insert(FILE_KEY.to_string(), FILE_BYTES.to_vec());
        }

        let state = MarketAppState::<TestDeps>::new(
            MemoryMarket::default(),
            FakeGateway::default(),
            RecordingNotifier::default(),
            MemoryBlobStore { local, files },
            MemoryRateLimitStore::new(),
            config,
        );

        let mut seller = user("lehrerin@schule.example", UserRole::Seller);
        seller.payment_account_id = Some("acct_seller".into());
        seller.capability = PaymentCapability {
            charges_enabled: true,
            payouts_enabled: true,
            onboarding_complete: true,
        };
        let resource = resource(&seller, 990);

        state.repo.insert_user(seller.clone()).await;
        state.repo.insert_resource(resource.clone()).await;

        Self {
            state,
            seller,
            resource,
        }
    }

    pub fn repo(&self) -> &MemoryMarket {
        &self.state.repo
    }

    pub fn webhook(&self) -> IngestWebhookUseCase<MemoryMarket, RecordingNotifier> {
        IngestWebhookUseCase::new(
            self.state.repo.clone(),
            self.state.notifier.clone(),
            self.state.config.clone(),
        )
    }

    pub async fn buyer(&self, email: &str) -> UserAccount {
        let buyer = user(email, UserRole::Buyer);
        self.repo().insert_user(buyer.clone()).await;
        buyer
    }

    /// PENDING transaction for the harness resource with a session attached
    pub async fn pending(&self, purchaser: Purchaser, session_id: &str) -> Transaction {
        let split = crate::domain::services::split_fee(self.resource.price_minor, 3000);
        let mut transaction = Transaction::pending(purchaser, self.resource.id, split);
        transaction.checkout_session_id = Some(session_id.to_string());
        self.repo().insert_transaction(transaction.clone()).await;
        transaction
    }

    /// Deliver a signed event body through the use case
    pub async fn deliver(&self, body: &str) -> MarketResult<crate::application::WebhookOutcome> {
        let header = sign(body, Utc::now());
        self.webhook().execute(Some(&header), body.as_bytes()).await
    }
}

/// Signature header for `body` at `at`
pub fn sign(body: &str, at: DateTime<Utc>) -> String {
    let t = at.timestamp();
    let tag = hmac_sha256(WEBHOOK_SECRET, format!("{t}.{body}").as_bytes());
    format!("t={},v1={}", t, to_hex(&tag))
}

pub fn checkout_completed(session_id: &str, payment_status: &str) -> String {
    json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "object": "checkout.session",
            "payment_status": payment_status,
            "payment_intent": { "id": "pi_test_1", "object": "payment_intent" },
            "payment_method_types": ["card"]
        }}
    })
    .to_string()
}

pub fn payment_failed(metadata: serde_json::Value) -> String {
    json!({
        "id": "evt_failed_1",
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": "pi_failed_1",
            "object": "payment_intent",
            "metadata": metadata
        }}
    })
    .to_string()
}

pub fn account_updated(account_id: &str, flags: serde_json::Value) -> String {
    let mut object = flags;
    object["id"] = json!(account_id);
    json!({
        "id": "evt_account_1",
        "type": "account.updated",
        "data": { "object": object }
    })
    .to_string()
}
