//! Marketplace Error Types
//!
//! Domain-specific error variants that integrate with the unified
//! `kernel::error::AppError` system. Every variant carries a stable
//! machine-readable code so client UIs can branch without parsing prose.

use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use thiserror::Error;

/// Marketplace-specific result type alias
pub type MarketResult<T> = Result<T, MarketError>;

#[derive(Debug, Error)]
pub enum MarketError {
    // ------------------------------------------------------------------
    // Webhook authenticity
    // ------------------------------------------------------------------
    #[error("missing signature")]
    MissingSignature,

    #[error("signature invalid")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A webhook handler failed; the gateway will redeliver
    #[error("webhook handler failed")]
    WebhookHandlerFailed(#[source] Box<MarketError>),

    // ------------------------------------------------------------------
    // Identity / authorization
    // ------------------------------------------------------------------
    #[error("Authentication required")]
    Unauthenticated,

    #[error("You do not have access to this resource")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    // ------------------------------------------------------------------
    // Checkout eligibility
    // ------------------------------------------------------------------
    #[error("Resource not found")]
    ResourceNotFound,

    #[error("Resource is not available for purchase")]
    ResourceNotAvailable,

    #[error("You cannot purchase your own resource")]
    OwnResource,

    #[error("You have already purchased this resource")]
    AlreadyPurchased,

    #[error("Seller cannot accept payments yet")]
    SellerNotPayable,

    #[error("Free resources do not require checkout")]
    FreeResource,

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("{0}")]
    Validation(String),

    #[error("An account with this email already exists")]
    EmailTaken,

    // ------------------------------------------------------------------
    // Download gate
    // ------------------------------------------------------------------
    #[error("Download link has expired")]
    TokenExpired,

    #[error("Maximum number of downloads reached")]
    MaxDownloadsReached,

    #[error("File not found")]
    FileMissing,

    // ------------------------------------------------------------------
    // Infrastructure
    // ------------------------------------------------------------------
    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Payment service unavailable: {0}")]
    PaymentGateway(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn kind(&self) -> ErrorKind {
        use MarketError::*;
        match self {
            MissingSignature | InvalidSignature | InvalidPayload(_) => ErrorKind::BadRequest,
            ResourceNotAvailable | OwnResource | AlreadyPurchased | SellerNotPayable
            | FreeResource | InvalidEmail(_) | Validation(_) => ErrorKind::BadRequest,
            Unauthenticated => ErrorKind::Unauthorized,
            Forbidden => ErrorKind::Forbidden,
            NotFound | ResourceNotFound | FileMissing => ErrorKind::NotFound,
            EmailTaken => ErrorKind::Conflict,
            TokenExpired | MaxDownloadsReached => ErrorKind::Gone,
            RateLimited { .. } => ErrorKind::TooManyRequests,
            PaymentGateway(_) => ErrorKind::ServiceUnavailable,
            WebhookHandlerFailed(_) | Storage(_) | Internal(_) => ErrorKind::InternalServerError,
            Database(e) => sqlx_kind(e),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        use MarketError::*;
        match self {
            MissingSignature => "MISSING_SIGNATURE",
            InvalidSignature => "INVALID_SIGNATURE",
            InvalidPayload(_) => "INVALID_PAYLOAD",
            WebhookHandlerFailed(_) => "WEBHOOK_HANDLER_FAILED",
            Unauthenticated => "UNAUTHENTICATED",
            Forbidden => "FORBIDDEN",
            NotFound => "NOT_FOUND",
            ResourceNotFound => "RESOURCE_NOT_FOUND",
            ResourceNotAvailable => "RESOURCE_NOT_AVAILABLE",
            OwnResource => "OWN_RESOURCE",
            AlreadyPurchased => "ALREADY_PURCHASED",
            SellerNotPayable => "SELLER_NOT_PAYABLE",
            FreeResource => "FREE_RESOURCE",
            InvalidEmail(_) => "INVALID_EMAIL",
            Validation(_) => "VALIDATION_ERROR",
            EmailTaken => "EMAIL_TAKEN",
            TokenExpired => "TOKEN_EXPIRED",
            MaxDownloadsReached => "MAX_DOWNLOADS_REACHED",
            FileMissing => "FILE_MISSING",
            RateLimited { .. } => "RATE_LIMITED",
            PaymentGateway(_) => "PAYMENT_SERVICE_UNAVAILABLE",
            Storage(_) | Database(_) | Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            MarketError::Database(e) => {
                tracing::error!(error = %e, "Marketplace database error");
            }
            MarketError::WebhookHandlerFailed(cause) => {
                tracing::error!(error = %cause, "Webhook handler failed");
            }
            MarketError::Storage(msg) | MarketError::Internal(msg) => {
                tracing::error!(message = %msg, "Marketplace internal error");
            }
            MarketError::PaymentGateway(msg) => {
                tracing::error!(message = %msg, "Payment gateway unavailable");
            }
            MarketError::FileMissing => {
                tracing::error!("Download file missing from storage");
            }
            MarketError::MissingSignature | MarketError::InvalidSignature => {
                tracing::warn!(error = %self, "Webhook rejected");
            }
            MarketError::RateLimited { .. } => {
                tracing::warn!("Rate limit exceeded");
            }
            _ => {
                tracing::debug!(error = %self, code = self.code(), "Marketplace request rejected");
            }
        }
    }
}

fn sqlx_kind(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorKind::ServiceUnavailable,
        _ => ErrorKind::InternalServerError,
    }
}

impl From<MarketError> for AppError {
    fn from(err: MarketError) -> Self {
        match err {
            // Status mapping for sqlx errors lives in kernel
            MarketError::Database(e) => AppError::from(e),
            MarketError::WebhookHandlerFailed(cause) => {
                AppError::internal("webhook handler failed")
                    .with_code("WEBHOOK_HANDLER_FAILED")
                    .expose_message()
                    .with_source(*cause)
            }
            other => {
                let code = other.code();
                AppError::new(other.kind(), other.to_string()).with_code(code)
            }
        }
    }
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        self.log();
        let retry_after = match &self {
            MarketError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let mut response = AppError::from(self).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

impl From<JsonRejection> for MarketError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // Well-formed JSON of the wrong shape, e.g. a missing field
            JsonRejection::JsonDataError(e) => MarketError::Validation(e.body_text()),
            other => MarketError::InvalidPayload(other.body_text()),
        }
    }
}

impl From<platform::rate_limit::RateLimitError> for MarketError {
    fn from(err: platform::rate_limit::RateLimitError) -> Self {
        MarketError::Internal(err.to_string())
    }
}
