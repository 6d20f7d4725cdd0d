//! Domain Services
//!
//! Pure rules shared by several use cases: fee arithmetic, amount
//! formatting, seller capability sync, the download token gate, and the
//! stateless session token.

use chrono::{DateTime, Utc};
use kernel::id::UserId;
use platform::crypto::{constant_time_eq, from_base64url, hmac_sha256, to_base64url};

use crate::domain::entities::{TokenLookup, UserAccount};
use crate::domain::events::AccountPayload;
use crate::domain::value_objects::{FeeSplit, PaymentCapability, TransactionStatus, UserRole};
use crate::error::{MarketError, MarketResult};

/// Basis points in one whole
const BPS_DENOMINATOR: i128 = 10_000;

// ============================================================================
// Fees
// ============================================================================

/// Split a price into platform fee and seller payout
///
/// The fee rounds half up to the nearest minor unit and the payout takes
/// the remainder, so `platform_fee + seller_payout == amount` always holds.
pub fn split_fee(amount: i64, fee_bps: u32) -> FeeSplit {
    let amount = amount.max(0);
    let fee = (amount as i128 * fee_bps as i128 + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR;
    let platform_fee = (fee as i64).min(amount);
    FeeSplit {
        amount,
        platform_fee,
        seller_payout: amount - platform_fee,
    }
}

/// `"CHF 9.90"`, or `"Free"` for zero
pub fn format_amount(amount: i64, currency: &str) -> String {
    if amount == 0 {
        return "Free".to_string();
    }
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{} {}{}.{:02}",
        currency.to_ascii_uppercase(),
        sign,
        abs / 100,
        abs % 100
    )
}

// ============================================================================
// Seller capability sync
// ============================================================================

/// New stored state after an `account.updated` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityChange {
    pub capability: PaymentCapability,
    pub role: UserRole,
}

/// Compute the capability write for an account event
///
/// Absent flags count as false. A BUYER becomes SELLER once charges are
/// enabled and details are submitted; roles are never lowered. Returns
/// `None` when nothing would change.
pub fn sync_capability(user: &UserAccount, account: &AccountPayload) -> Option<CapabilityChange> {
    let charges_enabled = account.charges_enabled.unwrap_or(false);
    let details_submitted = account.details_submitted.unwrap_or(false);

    let capability = PaymentCapability {
        charges_enabled,
        payouts_enabled: account.payouts_enabled.unwrap_or(false),
        onboarding_complete: details_submitted,
    };

    let role = if user.role == UserRole::Buyer && charges_enabled && details_submitted {
        UserRole::Seller
    } else {
        user.role
    };

    if capability == user.capability && role == user.role {
        return None;
    }
    Some(CapabilityChange { capability, role })
}

// ============================================================================
// Download gate
// ============================================================================

/// Read-only checks of a guest download token, in order
///
/// An unfinished transaction reads as an unknown token. Expiry wins over
/// exhaustion.
pub fn check_download_token(lookup: &TokenLookup, now: DateTime<Utc>) -> MarketResult<()> {
    if lookup.transaction_status != TransactionStatus::Completed {
        return Err(MarketError::NotFound);
    }
    if lookup.token.is_expired(now) {
        return Err(MarketError::TokenExpired);
    }
    if lookup.token.is_exhausted() {
        return Err(MarketError::MaxDownloadsReached);
    }
    Ok(())
}

// ============================================================================
// Session token
// ============================================================================

const SESSION_PAYLOAD_LEN: usize = 16 + 8;
const SESSION_TOKEN_LEN: usize = SESSION_PAYLOAD_LEN + 32;

/// Issue `base64url(user uuid ‖ expiry ms (BE) ‖ HMAC-SHA256)`
pub fn issue_session_token(user_id: &UserId, expires_at_ms: i64, secret: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(SESSION_TOKEN_LEN);
    bytes.extend_from_slice(user_id.as_uuid().as_bytes());
    bytes.extend_from_slice(&expires_at_ms.to_be_bytes());
    let tag = hmac_sha256(secret, &bytes);
    bytes.extend_from_slice(&tag);
    to_base64url(&bytes)
}

/// Recover the user from a session token; `None` if forged, malformed or expired
pub fn verify_session_token(token: &str, secret: &[u8], now_ms: i64) -> Option<UserId> {
    let bytes = from_base64url(token).ok()?;
    if bytes.len() != SESSION_TOKEN_LEN {
        return None;
    }

    let (payload, tag) = bytes.split_at(SESSION_PAYLOAD_LEN);
    if !constant_time_eq(&hmac_sha256(secret, payload), tag) {
        return None;
    }

    let (uuid_bytes, expiry_bytes) = payload.split_at(16);
    let expires_at_ms = i64::from_be_bytes(expiry_bytes.try_into().ok()?);
    if now_ms >= expires_at_ms {
        return None;
    }

    let uuid = uuid::Uuid::from_slice(uuid_bytes).ok()?;
    Some(UserId::from_uuid(uuid))
}
