//! File Delivery
//!
//! Resolves a resource's file once access has been granted.

use std::time::Duration;

use crate::domain::entities::Resource;
use crate::domain::ports::{BlobStore, StorageError};
use crate::error::{MarketError, MarketResult};

/// How the caller receives the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDelivery {
    /// Short-lived signed URL on remote storage
    Redirect(String),
    /// Bytes read from local storage
    Inline {
        content_type: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

pub async fn deliver_file<B>(
    blobs: &B,
    resource: &Resource,
    signed_url_ttl: Duration,
) -> MarketResult<FileDelivery>
where
    B: BlobStore + Send + Sync,
{
    if !blobs.is_local() {
        let url = blobs.signed_url(&resource.file_key, signed_url_ttl).await?;
        return Ok(FileDelivery::Redirect(url));
    }

    // A key the store refuses cannot name an existing file
    let found = match blobs.get_file(&resource.file_key).await {
        Err(StorageError::InvalidKey(_)) => None,
        other => other?,
    };

    match found {
        Some(bytes) => Ok(FileDelivery::Inline {
            content_type: resource.content_type.clone(),
            file_name: file_name(&resource.file_key),
            bytes,
        }),
        None => {
            tracing::error!(
                resource_id = %resource.id,
                file_key = %resource.file_key,
                "File missing from local storage after access was granted"
            );
            Err(MarketError::FileMissing)
        }
    }
}

/// Last path segment of a storage key, safe for a quoted header value
fn file_name(key: &str) -> String {
    let name: String = key
        .rsplit('/')
        .next()
        .unwrap_or(key)
        .chars()
        .filter(|c| c.is_ascii_graphic() && *c != '"' && *c != '\\')
        .collect();
    if name.is_empty() {
        "download".to_string()
    } else {
        name
    }
}
