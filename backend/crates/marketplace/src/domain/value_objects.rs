//! Domain Value Objects
//!
//! Immutable value types for the marketplace domain.

use crate::error::{MarketError, MarketResult};
use kernel::id::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum email length (per RFC 5321)
const EMAIL_MAX_LENGTH: usize = 254;

/// Email address value object (trimmed, lowercased)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    pub fn new(email: impl Into<String>) -> MarketResult<Self> {
        let email = email.into().trim().to_lowercase();

        if email.is_empty() {
            return Err(MarketError::InvalidEmail("email cannot be empty".into()));
        }
        if email.len() > EMAIL_MAX_LENGTH {
            return Err(MarketError::InvalidEmail(format!(
                "email must be at most {} characters",
                EMAIL_MAX_LENGTH
            )));
        }
        if !Self::is_valid_format(&email) {
            return Err(MarketError::InvalidEmail("invalid email format".into()));
        }

        Ok(Self(email))
    }

    fn is_valid_format(email: &str) -> bool {
        let Some((local, domain)) = email.split_once('@') else {
            return false;
        };
        if local.is_empty() || local.len() > 64 || domain.contains('@') {
            return false;
        }
        if domain.is_empty() || !domain.contains('.') {
            return false;
        }
        if !domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return false;
        }
        !(domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']))
    }

    /// Create from database value (assumed already validated)
    pub fn from_db(email: impl Into<String>) -> Self {
        Self(email.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who pays for a transaction
///
/// Exactly one identity per purchase: the "both" and "neither" states of
/// two nullable columns cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Purchaser {
    Registered(UserId),
    Guest(Email),
}

impl Purchaser {
    pub fn buyer_id(&self) -> Option<UserId> {
        match self {
            Purchaser::Registered(id) => Some(*id),
            Purchaser::Guest(_) => None,
        }
    }

    pub fn guest_email(&self) -> Option<&Email> {
        match self {
            Purchaser::Registered(_) => None,
            Purchaser::Guest(email) => Some(email),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Purchaser::Guest(_))
    }

    /// Rebuild from the two storage columns; `None` if both or neither are set
    pub fn from_columns(buyer_id: Option<UserId>, guest_email: Option<String>) -> Option<Self> {
        match (buyer_id, guest_email) {
            (Some(id), None) => Some(Purchaser::Registered(id)),
            (None, Some(email)) => Some(Purchaser::Guest(Email::from_db(email))),
            _ => None,
        }
    }
}

/// Transaction lifecycle state
///
/// PENDING -> COMPLETED | FAILED; both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionStatus {
    Pending = 0,
    Completed = 1,
    Failed = 2,
}

impl TransactionStatus {
    #[inline]
    pub const fn id(&self) -> i16 {
        *self as i16
    }

    pub const fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            1 => Some(TransactionStatus::Completed),
            2 => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum UserRole {
    #[default]
    Buyer = 0,
    Seller = 1,
    Admin = 2,
}

impl UserRole {
    #[inline]
    pub const fn id(&self) -> i16 {
        *self as i16
    }

    pub const fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(UserRole::Buyer),
            1 => Some(UserRole::Seller),
            2 => Some(UserRole::Admin),
            _ => None,
        }
    }

    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            UserRole::Buyer => "buyer",
            UserRole::Seller => "seller",
            UserRole::Admin => "admin",
        }
    }
}

/// Seller payment-capability flags mirrored from the gateway account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaymentCapability {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub onboarding_complete: bool,
}

/// Platform fee / seller payout split of a price, in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub amount: i64,
    pub platform_fee: i64,
    pub seller_payout: i64,
}
