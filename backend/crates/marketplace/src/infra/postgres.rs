//! PostgreSQL Repository Implementations

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{
    CheckoutSessionView, Completion, DownloadToken, Grant, NewUser, Resource, TokenLookup,
    Transaction, UserAccount,
};
use crate::domain::repository::{
    DownloadRepository, ResourceRepository, TransactionRepository, UserRepository,
};
use crate::domain::value_objects::{
    Email, PaymentCapability, Purchaser, TransactionStatus, UserRole,
};
use crate::error::{MarketError, MarketResult};
use kernel::id::{DownloadTokenId, ResourceId, TransactionId, UserId};

/// PostgreSQL-backed marketplace repository
#[derive(Clone)]
pub struct PgMarketRepository {
    pool: PgPool,
}

impl PgMarketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = r#"
    user_id,
    email,
    display_name,
    user_role,
    payment_account_id,
    payment_customer_id,
    charges_enabled,
    payouts_enabled,
    onboarding_complete
"#;

const RESOURCE_COLUMNS: &str = r#"
    resource_id,
    seller_id,
    title,
    price_minor,
    is_published,
    is_approved,
    file_key,
    content_type
"#;

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id,
    buyer_id,
    guest_email,
    resource_id,
    amount_minor,
    platform_fee_minor,
    seller_payout_minor,
    status,
    checkout_session_id,
    payment_intent_id,
    payment_method,
    created_at,
    updated_at
"#;

// ============================================================================
// User Repository Implementation
// ============================================================================

impl UserRepository for PgMarketRepository {
    async fn find_user(&self, user_id: &UserId) -> MarketResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_account).transpose()
    }

    async fn find_user_by_payment_account(
        &self,
        account_id: &str,
    ) -> MarketResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE payment_account_id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_account).transpose()
    }

    async fn update_payment_capability(
        &self,
        user_id: &UserId,
        capability: PaymentCapability,
        role: UserRole,
    ) -> MarketResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                charges_enabled = $2,
                payouts_enabled = $3,
                onboarding_complete = $4,
                user_role = $5,
                updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(capability.charges_enabled)
        .bind(capability.payouts_enabled)
        .bind(capability.onboarding_complete)
        .bind(role.id())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_payment_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> MarketResult<String> {
        let stored = sqlx::query_scalar::<_, Option<String>>(
            r#"
            UPDATE users SET
                payment_customer_id = COALESCE(payment_customer_id, $2),
                updated_at = now()
            WHERE user_id = $1
            RETURNING payment_customer_id
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        stored
            .flatten()
            .ok_or_else(|| MarketError::Internal(format!("user {} vanished during checkout", user_id)))
    }

    async fn email_exists(&self, email: &Email) -> MarketResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn create_user(&self, user: &NewUser) -> MarketResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id,
                email,
                password_hash,
                display_name,
                user_role
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(user.email.as_str())
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.role.id())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => MarketError::EmailTaken,
            other => MarketError::Database(other),
        })?;

        Ok(())
    }
}

// ============================================================================
// Resource Repository Implementation
// ============================================================================

impl ResourceRepository for PgMarketRepository {
    async fn find_resource(&self, resource_id: &ResourceId) -> MarketResult<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE resource_id = $1"
        ))
        .bind(resource_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ResourceRow::into_resource))
    }
}

// ============================================================================
// Transaction Repository Implementation
// ============================================================================

impl TransactionRepository for PgMarketRepository {
    async fn has_completed_purchase(
        &self,
        purchaser: &Purchaser,
        resource_id: &ResourceId,
    ) -> MarketResult<bool> {
        // Linked guest purchases keep only the account id, so a guest email
        // also matches purchases of the account registered under it
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM transactions
                WHERE resource_id = $1
                  AND status = $2
                  AND (
                      buyer_id = $3
                      OR guest_email = $4
                      OR buyer_id = (SELECT user_id FROM users WHERE email = $4)
                  )
            )
            "#,
        )
        .bind(resource_id.as_uuid())
        .bind(TransactionStatus::Completed.id())
        .bind(purchaser.buyer_id().map(|id| id.into_uuid()))
        .bind(purchaser.guest_email().map(Email::as_str))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create_pending(&self, transaction: &Transaction) -> MarketResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id,
                buyer_id,
                guest_email,
                resource_id,
                amount_minor,
                platform_fee_minor,
                seller_payout_minor,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.purchaser.buyer_id().map(|id| id.into_uuid()))
        .bind(transaction.purchaser.guest_email().map(Email::as_str))
        .bind(transaction.resource_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.platform_fee)
        .bind(transaction.seller_payout)
        .bind(TransactionStatus::Pending.id())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attach_checkout_session(
        &self,
        transaction_id: &TransactionId,
        session_id: &str,
    ) -> MarketResult<()> {
        sqlx::query(
            r#"
            UPDATE transactions SET
                checkout_session_id = $2,
                updated_at = now()
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id.as_uuid())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_pending_by_session(&self, session_id: &str) -> MarketResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE checkout_session_id = $1 AND status = $2"
        ))
        .bind(session_id)
        .bind(TransactionStatus::Pending.id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn complete_transaction(&self, completion: &Completion) -> MarketResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE transactions SET
                status = $2,
                payment_intent_id = COALESCE($3, payment_intent_id),
                payment_method = COALESCE($4, payment_method),
                updated_at = now()
            WHERE transaction_id = $1 AND status = $5
            "#,
        )
        .bind(completion.transaction_id.as_uuid())
        .bind(TransactionStatus::Completed.id())
        .bind(&completion.payment_intent_id)
        .bind(&completion.payment_method)
        .bind(TransactionStatus::Pending.id())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        match &completion.grant {
            Grant::Entitlement {
                user_id,
                resource_id,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO download_entitlements (user_id, resource_id)
                    VALUES ($1, $2)
                    ON CONFLICT (user_id, resource_id) DO NOTHING
                    "#,
                )
                .bind(user_id.as_uuid())
                .bind(resource_id.as_uuid())
                .execute(&mut *tx)
                .await?;
            }
            Grant::Token(token) => {
                sqlx::query(
                    r#"
                    INSERT INTO download_tokens (
                        download_token_id,
                        token,
                        transaction_id,
                        expires_at,
                        download_count,
                        max_downloads,
                        created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(token.id.as_uuid())
                .bind(&token.token)
                .bind(token.transaction_id.as_uuid())
                .bind(token.expires_at)
                .bind(token.download_count)
                .bind(token.max_downloads)
                .bind(token.created_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_pending(
        &self,
        purchaser: &Purchaser,
        resource_id: &ResourceId,
        transaction_id: Option<TransactionId>,
        payment_intent_id: &str,
    ) -> MarketResult<Option<TransactionId>> {
        // A concurrent delivery blocks on the same row and then fails the
        // status re-check instead of moving on to an older PENDING row.
        let failed = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE transactions SET
                status = $5,
                payment_intent_id = $4,
                updated_at = now()
            WHERE transaction_id = COALESCE($7, (
                SELECT transaction_id FROM transactions
                WHERE resource_id = $1
                  AND status = $6
                  AND (buyer_id = $2 OR guest_email = $3)
                ORDER BY created_at DESC
                LIMIT 1
            ))
              AND resource_id = $1
              AND (buyer_id = $2 OR guest_email = $3)
              AND status = $6
            RETURNING transaction_id
            "#,
        )
        .bind(resource_id.as_uuid())
        .bind(purchaser.buyer_id().map(|id| id.into_uuid()))
        .bind(purchaser.guest_email().map(Email::as_str))
        .bind(payment_intent_id)
        .bind(TransactionStatus::Failed.id())
        .bind(TransactionStatus::Pending.id())
        .bind(transaction_id.map(|id| id.into_uuid()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(failed.map(TransactionId::from_uuid))
    }

    async fn find_checkout_session(
        &self,
        session_id: &str,
        buyer_id: &UserId,
    ) -> MarketResult<Option<CheckoutSessionView>> {
        let row = sqlx::query_as::<_, CheckoutSessionRow>(
            r#"
            SELECT
                t.transaction_id,
                t.buyer_id,
                t.guest_email,
                t.resource_id,
                t.amount_minor,
                t.platform_fee_minor,
                t.seller_payout_minor,
                t.status,
                t.checkout_session_id,
                t.payment_intent_id,
                t.payment_method,
                t.created_at,
                t.updated_at,
                r.title AS resource_title
            FROM transactions t
            JOIN resources r ON r.resource_id = t.resource_id
            WHERE t.checkout_session_id = $1 AND t.buyer_id = $2
            "#,
        )
        .bind(session_id)
        .bind(buyer_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(CheckoutSessionView {
                transaction: r.transaction.into_transaction()?,
                resource_title: r.resource_title,
            })
        })
        .transpose()
    }

    async fn link_guest_purchases(
        &self,
        email: &Email,
        user_id: &UserId,
    ) -> MarketResult<Vec<ResourceId>> {
        let mut tx = self.pool.begin().await?;

        let mut resources = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE transactions SET
                buyer_id = $1,
                guest_email = NULL,
                updated_at = now()
            WHERE guest_email = $2
              AND buyer_id IS NULL
              AND status = $3
            RETURNING resource_id
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(email.as_str())
        .bind(TransactionStatus::Completed.id())
        .fetch_all(&mut *tx)
        .await?;

        resources.sort_unstable();
        resources.dedup();

        if !resources.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO download_entitlements (user_id, resource_id)
                SELECT $1, UNNEST($2::uuid[])
                ON CONFLICT (user_id, resource_id) DO NOTHING
                "#,
            )
            .bind(user_id.as_uuid())
            .bind(&resources)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(resources.into_iter().map(ResourceId::from_uuid).collect())
    }
}

// ============================================================================
// Download Repository Implementation
// ============================================================================

impl DownloadRepository for PgMarketRepository {
    async fn find_download_token(&self, token: &str) -> MarketResult<Option<TokenLookup>> {
        let row = sqlx::query_as::<_, TokenLookupRow>(
            r#"
            SELECT
                d.download_token_id,
                d.token,
                d.transaction_id,
                d.expires_at,
                d.download_count,
                d.max_downloads,
                d.created_at,
                t.status AS transaction_status,
                r.resource_id,
                r.seller_id,
                r.title,
                r.price_minor,
                r.is_published,
                r.is_approved,
                r.file_key,
                r.content_type
            FROM download_tokens d
            JOIN transactions t ON t.transaction_id = d.transaction_id
            JOIN resources r ON r.resource_id = t.resource_id
            WHERE d.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TokenLookupRow::into_lookup).transpose()
    }

    async fn consume_download(&self, token_id: &DownloadTokenId) -> MarketResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE download_tokens SET
                download_count = download_count + 1
            WHERE download_token_id = $1
              AND download_count < max_downloads
            "#,
        )
        .bind(token_id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn has_entitlement(
        &self,
        user_id: &UserId,
        resource_id: &ResourceId,
    ) -> MarketResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM download_entitlements WHERE user_id = $1 AND resource_id = $2)",
        )
        .bind(user_id.as_uuid())
        .bind(resource_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn grant_entitlement(
        &self,
        user_id: &UserId,
        resource_id: &ResourceId,
    ) -> MarketResult<()> {
        sqlx::query(
            r#"
            INSERT INTO download_entitlements (user_id, resource_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, resource_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(resource_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: Uuid,
    email: String,
    display_name: Option<String>,
    user_role: i16,
    payment_account_id: Option<String>,
    payment_customer_id: Option<String>,
    charges_enabled: bool,
    payouts_enabled: bool,
    onboarding_complete: bool,
}

impl UserRow {
    fn into_account(self) -> MarketResult<UserAccount> {
        let role = UserRole::from_id(self.user_role)
            .ok_or_else(|| MarketError::Internal(format!("Invalid user role: {}", self.user_role)))?;

        Ok(UserAccount {
            id: UserId::from_uuid(self.user_id),
            email: Email::from_db(self.email),
            display_name: self.display_name,
            role,
            payment_account_id: self.payment_account_id,
            payment_customer_id: self.payment_customer_id,
            capability: PaymentCapability {
                charges_enabled: self.charges_enabled,
                payouts_enabled: self.payouts_enabled,
                onboarding_complete: self.onboarding_complete,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    resource_id: Uuid,
    seller_id: Uuid,
    title: String,
    price_minor: i64,
    is_published: bool,
    is_approved: bool,
    file_key: String,
    content_type: String,
}

impl ResourceRow {
    fn into_resource(self) -> Resource {
        Resource {
            id: ResourceId::from_uuid(self.resource_id),
            seller_id: UserId::from_uuid(self.seller_id),
            title: self.title,
            price_minor: self.price_minor,
            is_published: self.is_published,
            is_approved: self.is_approved,
            file_key: self.file_key,
            content_type: self.content_type,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    buyer_id: Option<Uuid>,
    guest_email: Option<String>,
    resource_id: Uuid,
    amount_minor: i64,
    platform_fee_minor: i64,
    seller_payout_minor: i64,
    status: i16,
    checkout_session_id: Option<String>,
    payment_intent_id: Option<String>,
    payment_method: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> MarketResult<Transaction> {
        let status = TransactionStatus::from_id(self.status).ok_or_else(|| {
            MarketError::Internal(format!("Invalid transaction status: {}", self.status))
        })?;
        let purchaser =
            Purchaser::from_columns(self.buyer_id.map(UserId::from_uuid), self.guest_email)
                .ok_or_else(|| {
                    MarketError::Internal(format!(
                        "Transaction {} has no single purchaser",
                        self.transaction_id
                    ))
                })?;

        Ok(Transaction {
            id: TransactionId::from_uuid(self.transaction_id),
            purchaser,
            resource_id: ResourceId::from_uuid(self.resource_id),
            amount: self.amount_minor,
            platform_fee: self.platform_fee_minor,
            seller_payout: self.seller_payout_minor,
            status,
            checkout_session_id: self.checkout_session_id,
            payment_intent_id: self.payment_intent_id,
            payment_method: self.payment_method,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckoutSessionRow {
    #[sqlx(flatten)]
    transaction: TransactionRow,
    resource_title: String,
}

#[derive(sqlx::FromRow)]
struct TokenLookupRow {
    download_token_id: Uuid,
    token: String,
    transaction_id: Uuid,
    expires_at: DateTime<Utc>,
    download_count: i32,
    max_downloads: i32,
    created_at: DateTime<Utc>,
    transaction_status: i16,
    #[sqlx(flatten)]
    resource: ResourceRow,
}

impl TokenLookupRow {
    fn into_lookup(self) -> MarketResult<TokenLookup> {
        let transaction_status = TransactionStatus::from_id(self.transaction_status)
            .ok_or_else(|| {
                MarketError::Internal(format!(
                    "Invalid transaction status: {}",
                    self.transaction_status
                ))
            })?;

        Ok(TokenLookup {
            token: DownloadToken {
                id: DownloadTokenId::from_uuid(self.download_token_id),
                token: self.token,
                transaction_id: TransactionId::from_uuid(self.transaction_id),
                expires_at: self.expires_at,
                download_count: self.download_count,
                max_downloads: self.max_downloads,
                created_at: self.created_at,
            },
            transaction_status,
            resource: self.resource.into_resource(),
        })
    }
}
