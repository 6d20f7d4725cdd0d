//! Payment Gateway Events
//!
//! Typed view of inbound webhook events and the signature scheme that
//! authenticates them. Payload shape variance is normalized here so the
//! application layer only sees plain ids.

use crate::domain::value_objects::{Email, Purchaser};
use crate::error::{MarketError, MarketResult};
use kernel::id::{ResourceId, TransactionId, UserId};
use serde::Deserialize;
use std::collections::HashMap;

/// Header carrying `t=<unix>,v1=<hex hmac>[,v1=...]`
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Metadata keys written on checkout sessions and payment intents
pub mod metadata_keys {
    pub const TRANSACTION_ID: &str = "transactionId";
    pub const RESOURCE_ID: &str = "resourceId";
    pub const BUYER_ID: &str = "buyerId";
    pub const GUEST_EMAIL: &str = "guestEmail";
}

// ============================================================================
// Signature verification
// ============================================================================

/// Verify a webhook signature header against the raw body
///
/// HMAC-SHA256 over `"{t}.{body}"`; any `v1` entry may match, and `t`
/// must lie within `tolerance_secs` of `now_unix`.
pub fn verify_signature(
    header: &str,
    body: &[u8],
    secret: &[u8],
    tolerance_secs: i64,
    now_unix: i64,
) -> MarketResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(MarketError::InvalidSignature)?;
    if candidates.is_empty() {
        return Err(MarketError::InvalidSignature);
    }
    if (now_unix - timestamp).abs() > tolerance_secs {
        tracing::warn!(timestamp, now_unix, "Webhook signature outside tolerance");
        return Err(MarketError::InvalidSignature);
    }

    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(body);

    if candidates
        .iter()
        .any(|tag| platform::crypto::verify_hmac_sha256_hex(secret, &signed, tag))
    {
        Ok(())
    } else {
        Err(MarketError::InvalidSignature)
    }
}

// ============================================================================
// Event envelope
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

/// A verified, parsed gateway event
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub id: String,
    pub event: GatewayEvent,
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    AccountUpdated(AccountPayload),
    CheckoutSessionCompleted(CheckoutSessionPayload),
    PaymentIntentFailed(PaymentIntentPayload),
    Other { event_type: String },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &str {
        match self {
            GatewayEvent::AccountUpdated(_) => "account.updated",
            GatewayEvent::CheckoutSessionCompleted(_) => "checkout.session.completed",
            GatewayEvent::PaymentIntentFailed(_) => "payment_intent.payment_failed",
            GatewayEvent::Other { event_type } => event_type,
        }
    }
}

impl ParsedEvent {
    pub fn parse(body: &[u8]) -> MarketResult<Self> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| MarketError::InvalidPayload(e.to_string()))?;

        let object = envelope.data.object;
        let event = match envelope.event_type.as_str() {
            "account.updated" => GatewayEvent::AccountUpdated(from_object(object)?),
            "checkout.session.completed" => {
                GatewayEvent::CheckoutSessionCompleted(from_object(object)?)
            }
            "payment_intent.payment_failed" => {
                GatewayEvent::PaymentIntentFailed(from_object(object)?)
            }
            _ => GatewayEvent::Other {
                event_type: envelope.event_type,
            },
        };

        Ok(Self {
            id: envelope.id,
            event,
        })
    }
}

fn from_object<T: for<'de> Deserialize<'de>>(object: serde_json::Value) -> MarketResult<T> {
    serde_json::from_value(object).map_err(|e| MarketError::InvalidPayload(e.to_string()))
}

// ============================================================================
// Payloads
// ============================================================================

/// `account.updated` object (connected seller account)
#[derive(Debug, Clone, Deserialize)]
pub struct AccountPayload {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: Option<bool>,
    #[serde(default)]
    pub payouts_enabled: Option<bool>,
    #[serde(default)]
    pub details_submitted: Option<bool>,
}

/// `checkout.session.completed` object
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionPayload {
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<PaymentIntentRef>,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
}

impl CheckoutSessionPayload {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    pub fn payment_intent_id(&self) -> Option<String> {
        self.payment_intent.as_ref().map(|r| r.id().to_string())
    }

    pub fn payment_method(&self) -> Option<String> {
        self.payment_method_types.first().cloned()
    }
}

/// The payment intent field is either a bare id or an expanded object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PaymentIntentRef {
    Id(String),
    Object { id: String },
}

impl PaymentIntentRef {
    pub fn id(&self) -> &str {
        match self {
            PaymentIntentRef::Id(id) | PaymentIntentRef::Object { id } => id,
        }
    }
}

/// `payment_intent.payment_failed` object
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentPayload {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntentPayload {
    /// Resource and purchaser from metadata
    ///
    /// `None` when the resource id is missing or malformed, or when the
    /// metadata names both a buyer and a guest, or neither.
    pub fn purchase_ref(&self) -> Option<(Purchaser, ResourceId)> {
        let get = |key: &str| {
            self.metadata
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let resource_id = ResourceId::parse(get(metadata_keys::RESOURCE_ID)?)?;
        let purchaser = match (get(metadata_keys::BUYER_ID), get(metadata_keys::GUEST_EMAIL)) {
            (Some(buyer), None) => Purchaser::Registered(UserId::parse(buyer)?),
            (None, Some(email)) => Purchaser::Guest(Email::new(email).ok()?),
            _ => return None,
        };
        Some((purchaser, resource_id))
    }

    /// Ledger row the checkout was opened for, when the metadata names one
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.metadata
            .get(metadata_keys::TRANSACTION_ID)
            .and_then(|v| TransactionId::parse(v.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::crypto::{hmac_sha256, to_hex};

    const SECRET: &[u8] = b"whsec_unit";

    fn header_for(body: &[u8], t: i64) -> String {
        let mut signed = format!("{}.", t).into_bytes();
        signed.extend_from_slice(body);
        format!("t={},v1={}", t, to_hex(&hmac_sha256(SECRET, &signed)))
    }

    #[test]
    fn test_signature_valid() {
        let body = br#"{"id":"evt_1"}"#;
        let header = header_for(body, 1_700_000_000);
        assert!(verify_signature(&header, body, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_signature_any_v1_may_match() {
        let body = br#"{"id":"evt_1"}"#;
        let good = header_for(body, 1_700_000_000);
        let header = format!("t=1700000000,v1=deadbeef,{}", good.split_once(',').unwrap().1);
        assert!(verify_signature(&header, body, SECRET, 300, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_signature_tampered_body() {
        let header = header_for(br#"{"id":"evt_1"}"#, 1_700_000_000);
        let result = verify_signature(&header, br#"{"id":"evt_2"}"#, SECRET, 300, 1_700_000_000);
        assert!(matches!(result, Err(MarketError::InvalidSignature)));
    }

    #[test]
    fn test_signature_outside_tolerance() {
        let body = b"{}";
        let header = header_for(body, 1_700_000_000);
        let result = verify_signature(&header, body, SECRET, 300, 1_700_000_301);
        assert!(matches!(result, Err(MarketError::InvalidSignature)));
    }

    #[test]
    fn test_signature_malformed_header() {
        for header in ["", "v1=abc", "t=abc,v1=abc", "t=1700000000"] {
            let result = verify_signature(header, b"{}", SECRET, 300, 1_700_000_000);
            assert!(matches!(result, Err(MarketError::InvalidSignature)), "{header}");
        }
    }

    #[test]
    fn test_payment_intent_ref_both_shapes() {
        let bare: CheckoutSessionPayload =
            serde_json::from_str(r#"{"id":"cs_1","payment_intent":"pi_123"}"#).unwrap();
        assert_eq!(bare.payment_intent_id().as_deref(), Some("pi_123"));

        let expanded: CheckoutSessionPayload = serde_json::from_str(
            r#"{"id":"cs_1","payment_intent":{"id":"pi_456","object":"payment_intent"}}"#,
        )
        .unwrap();
        assert_eq!(expanded.payment_intent_id().as_deref(), Some("pi_456"));

        let absent: CheckoutSessionPayload = serde_json::from_str(r#"{"id":"cs_1"}"#).unwrap();
        assert_eq!(absent.payment_intent_id(), None);
    }

    #[test]
    fn test_parse_dispatches_by_type() {
        let body = br#"{"id":"evt_9","type":"checkout.session.completed","data":{"object":{"id":"cs_9","payment_status":"paid","payment_method_types":["card","twint"]}}}"#;
        let parsed = ParsedEvent::parse(body).unwrap();
        assert_eq!(parsed.id, "evt_9");
        match parsed.event {
            GatewayEvent::CheckoutSessionCompleted(session) => {
                assert!(session.is_paid());
                assert_eq!(session.payment_method().as_deref(), Some("card"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let body = br#"{"id":"evt_10","type":"customer.created","data":{"object":{}}}"#;
        let parsed = ParsedEvent::parse(body).unwrap();
        assert_eq!(parsed.event.event_type(), "customer.created");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            ParsedEvent::parse(b"not json"),
            Err(MarketError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_account_flags_default_absent() {
        let body = br#"{"id":"evt_a","type":"account.updated","data":{"object":{"id":"acct_1","charges_enabled":true}}}"#;
        let GatewayEvent::AccountUpdated(account) = ParsedEvent::parse(body).unwrap().event else {
            panic!("expected account.updated");
        };
        assert_eq!(account.charges_enabled, Some(true));
        assert_eq!(account.payouts_enabled, None);
    }

    #[test]
    fn test_purchase_ref_requires_exactly_one_identity() {
        let resource = ResourceId::new();
        let buyer = UserId::new();
        let payload = |pairs: &[(&str, String)]| PaymentIntentPayload {
            id: "pi_1".into(),
            metadata: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        };

        let registered = payload(&[
            (metadata_keys::RESOURCE_ID, resource.to_string()),
            (metadata_keys::BUYER_ID, buyer.to_string()),
        ]);
        assert_eq!(
            registered.purchase_ref(),
            Some((Purchaser::Registered(buyer), resource))
        );

        let guest = payload(&[
            (metadata_keys::RESOURCE_ID, resource.to_string()),
            (metadata_keys::GUEST_EMAIL, "Gast@Example.com".into()),
        ]);
        assert_eq!(
            guest.purchase_ref(),
            Some((Purchaser::Guest(Email::from_db("gast@example.com")), resource))
        );

        let both = payload(&[
            (metadata_keys::RESOURCE_ID, resource.to_string()),
            (metadata_keys::BUYER_ID, buyer.to_string()),
            (metadata_keys::GUEST_EMAIL, "g@example.com".into()),
        ]);
        assert_eq!(both.purchase_ref(), None);

        let no_resource = payload(&[(metadata_keys::BUYER_ID, buyer.to_string())]);
        assert_eq!(no_resource.purchase_ref(), None);
    }
}
