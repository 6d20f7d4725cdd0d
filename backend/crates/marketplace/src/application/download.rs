//! Download Use Cases
//!
//! Guest downloads spend one unit of a bounded token; registered buyers
//! download against a permanent entitlement.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{ResourceId, UserId};

use crate::application::config::MarketConfig;
use crate::application::file_delivery::{FileDelivery, deliver_file};
use crate::domain::ports::BlobStore;
use crate::domain::repository::MarketRepository;
use crate::domain::services::check_download_token;
use crate::error::{MarketError, MarketResult};

// ============================================================================
// Guest token download
// ============================================================================

/// Download with token use case
pub struct DownloadWithTokenUseCase<R, B>
where
    R: MarketRepository,
    B: BlobStore + Send + Sync + 'static,
{
    repo: Arc<R>,
    blobs: Arc<B>,
    config: Arc<MarketConfig>,
}

impl<R, B> DownloadWithTokenUseCase<R, B>
where
    R: MarketRepository,
    B: BlobStore + Send + Sync + 'static,
{
    pub fn new(repo: Arc<R>, blobs: Arc<B>, config: Arc<MarketConfig>) -> Self {
        Self {
            repo,
            blobs,
            config,
        }
    }

    /// Validate the token, spend one unit, then resolve the file
    ///
    /// The unit is spent before storage is touched and is not returned if
    /// the file turns out to be missing.
    pub async fn execute(&self, token: &str) -> MarketResult<FileDelivery> {
        let lookup = self
            .repo
            .find_download_token(token)
            .await?
            .ok_or(MarketError::NotFound)?;

        check_download_token(&lookup, Utc::now())?;

        // Lost the race for the last unit
        if !self.repo.consume_download(&lookup.token.id).await? {
            tracing::warn!(download_token_id = %lookup.token.id, "Download quota exhausted concurrently");
            return Err(MarketError::MaxDownloadsReached);
        }

        tracing::info!(
            download_token_id = %lookup.token.id,
            resource_id = %lookup.resource.id,
            remaining = lookup.token.remaining() - 1,
            "Guest download authorized"
        );

        deliver_file(&*self.blobs, &lookup.resource, self.config.signed_url_ttl).await
    }
}

// ============================================================================
// Entitled download
// ============================================================================

/// Download for a signed-in user
pub struct DownloadResourceUseCase<R, B>
where
    R: MarketRepository,
    B: BlobStore + Send + Sync + 'static,
{
    repo: Arc<R>,
    blobs: Arc<B>,
    config: Arc<MarketConfig>,
}

impl<R, B> DownloadResourceUseCase<R, B>
where
    R: MarketRepository,
    B: BlobStore + Send + Sync + 'static,
{
    pub fn new(repo: Arc<R>, blobs: Arc<B>, config: Arc<MarketConfig>) -> Self {
        Self {
            repo,
            blobs,
            config,
        }
    }

    /// Entitlement holders, the seller, and anyone for a listed free resource
    pub async fn execute(
        &self,
        user_id: Option<UserId>,
        resource_id: &str,
    ) -> MarketResult<FileDelivery> {
        let user_id = user_id.ok_or(MarketError::Unauthenticated)?;
        let resource_id = ResourceId::parse(resource_id).ok_or(MarketError::ResourceNotFound)?;

        let resource = self
            .repo
            .find_resource(&resource_id)
            .await?
            .ok_or(MarketError::ResourceNotFound)?;

        let allowed = if resource.seller_id == user_id
            || self.repo.has_entitlement(&user_id, &resource.id).await?
        {
            true
        } else if resource.is_free() && resource.is_listed() {
            self.repo.grant_entitlement(&user_id, &resource.id).await?;
            tracing::info!(user_id = %user_id, resource_id = %resource.id, "Free resource entitlement granted");
            true
        } else {
            false
        };

        if !allowed {
            return Err(MarketError::Forbidden);
        }

        deliver_file(&*self.blobs, &resource, self.config.signed_url_ttl).await
    }
}
