//! Payment Gateway HTTP Client
//!
//! Form-encoded REST calls authenticated with the secret key as bearer
//! token. Checkout sessions route the payout to the seller's connected
//! account and keep the platform fee as application fee.

use serde::Deserialize;

use crate::domain::events::metadata_keys;
use crate::domain::ports::{CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway};
use crate::domain::value_objects::{Email, Purchaser};
use kernel::id::UserId;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    async fn post_form<T>(&self, path: &str, form: &[(String, String)]) -> Result<T, GatewayError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let resp = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str::<T>(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Gateway's own error message, without echoing whole bodies into logs
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| "unreadable error body".to_string())
}

/// Form fields for a hosted checkout session
fn checkout_form(req: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), req.success_url.clone()),
        ("cancel_url".into(), req.cancel_url.clone()),
        ("client_reference_id".into(), req.transaction_id.to_string()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), req.currency.clone()),
        ("line_items[0][price_data][unit_amount]".into(), req.amount.to_string()),
        (
            "line_items[0][price_data][product_data][name]".into(),
            req.resource_title.clone(),
        ),
        (
            "payment_intent_data[application_fee_amount]".into(),
            req.platform_fee.to_string(),
        ),
        (
            "payment_intent_data[transfer_data][destination]".into(),
            req.seller_account_id.clone(),
        ),
    ];

    match (&req.customer_id, &req.purchaser) {
        (Some(customer), _) => form.push(("customer".into(), customer.clone())),
        (None, Purchaser::Guest(email)) => form.push(("customer_email".into(), email.to_string())),
        (None, Purchaser::Registered(_)) => {}
    }

    let mut metadata = vec![
        (metadata_keys::TRANSACTION_ID, req.transaction_id.to_string()),
        (metadata_keys::RESOURCE_ID, req.resource_id.to_string()),
    ];
    match &req.purchaser {
        Purchaser::Registered(id) => metadata.push((metadata_keys::BUYER_ID, id.to_string())),
        Purchaser::Guest(email) => metadata.push((metadata_keys::GUEST_EMAIL, email.to_string())),
    }

    // Same metadata on the session and its payment intent
    for (key, value) in metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
        form.push((format!("payment_intent_data[metadata][{key}]"), value));
    }

    form
}

impl PaymentGateway for StripeGateway {
    async fn create_customer(
        &self,
        email: &Email,
        user_id: &UserId,
    ) -> Result<String, GatewayError> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            ("metadata[userId]".to_string(), user_id.to_string()),
        ];
        let customer: CustomerResponse = self.post_form("/v1/customers", &form).await?;

        tracing::info!(user_id = %user_id, "Payment customer created");
        Ok(customer.id)
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let session: SessionResponse = self
            .post_form("/v1/checkout/sessions", &checkout_form(request))
            .await?;

        let url = session
            .url
            .ok_or_else(|| GatewayError::Decode("checkout session without url".into()))?;

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}
