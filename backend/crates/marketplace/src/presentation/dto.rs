//! API DTOs (Data Transfer Objects)

use axum::extract::FromRequest;
use serde::{Deserialize, Serialize};

use crate::error::MarketError;

/// JSON request body; malformed or incomplete bodies answer 400 with a code
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(MarketError))]
pub struct JsonBody<T>(pub T);

// ============================================================================
// Webhook
// ============================================================================

/// Webhook acknowledgement
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

// ============================================================================
// Checkout
// ============================================================================

/// Checkout request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub resource_id: String,
    /// Required when not signed in
    #[serde(default)]
    pub guest_email: Option<String>,
}

/// Checkout response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
}

/// Checkout session summary for the success page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub transaction_id: String,
    pub session_id: String,
    pub amount: i64,
    /// "CHF 9.90" or "Free"
    pub formatted_amount: String,
    pub status: String,
    pub resource: ResourceSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub id: String,
    pub title: String,
}

// ============================================================================
// Registration
// ============================================================================

/// Registration request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Registration response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: String,
    /// Guest purchases attached to the new account
    pub linked_purchases: usize,
}
