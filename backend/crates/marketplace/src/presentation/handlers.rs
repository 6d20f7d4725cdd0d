//! HTTP Handlers

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use chrono::Utc;
use kernel::id::UserId;
use platform::rate_limit::RateLimitStore;
use std::sync::Arc;

use crate::application::config::MarketConfig;
use crate::application::{
    CheckoutInput, CheckoutSessionUseCase, CheckoutUseCase, DownloadResourceUseCase,
    DownloadWithTokenUseCase, FileDelivery, IngestWebhookUseCase, RegisterInput, RegisterUseCase,
};
use crate::domain::events::SIGNATURE_HEADER;
use crate::domain::ports::{BlobStore, PaymentGateway, PurchaseNotifier};
use crate::domain::repository::MarketRepository;
use crate::domain::services::verify_session_token;
use crate::error::{MarketError, MarketResult};
use crate::presentation::dto::{
    CheckoutRequest, CheckoutResponse, CheckoutSessionResponse, JsonBody, RegisterRequest,
    RegisterResponse, ResourceSummary, WebhookAck,
};

/// Collaborators the handlers are generic over
pub trait MarketDeps: Send + Sync + 'static {
    type Repo: MarketRepository;
    type Gateway: PaymentGateway + Send + Sync + 'static;
    type Notifier: PurchaseNotifier + Send + Sync + 'static;
    type Blobs: BlobStore + Send + Sync + 'static;
    type Limiter: RateLimitStore + Send + Sync + 'static;
}

/// Shared state for marketplace handlers
pub struct MarketAppState<D: MarketDeps> {
    pub repo: Arc<D::Repo>,
    pub gateway: Arc<D::Gateway>,
    pub notifier: Arc<D::Notifier>,
    pub blobs: Arc<D::Blobs>,
    pub limiter: Arc<D::Limiter>,
    pub config: Arc<MarketConfig>,
}

// Derive would require `D: Clone`
impl<D: MarketDeps> Clone for MarketAppState<D> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            gateway: self.gateway.clone(),
            notifier: self.notifier.clone(),
            blobs: self.blobs.clone(),
            limiter: self.limiter.clone(),
            config: self.config.clone(),
        }
    }
}

impl<D: MarketDeps> MarketAppState<D> {
    pub fn new(
        repo: D::Repo,
        gateway: D::Gateway,
        notifier: D::Notifier,
        blobs: D::Blobs,
        limiter: D::Limiter,
        config: MarketConfig,
    ) -> Self {
        Self {
            repo: Arc::new(repo),
            gateway: Arc::new(gateway),
            notifier: Arc::new(notifier),
            blobs: Arc::new(blobs),
            limiter: Arc::new(limiter),
            config: Arc::new(config),
        }
    }
}

/// Signed-in user from the session cookie, if any
fn session_user(headers: &HeaderMap, config: &MarketConfig) -> Option<UserId> {
    let token = platform::cookie::extract_cookie(headers, &config.session_cookie_name)?;
    verify_session_token(
        &token,
        &config.session_secret,
        Utc::now().timestamp_millis(),
    )
}

fn file_response(delivery: FileDelivery) -> Response {
    match delivery {
        FileDelivery::Redirect(url) => Redirect::temporary(&url).into_response(),
        FileDelivery::Inline {
            content_type,
            file_name,
            bytes,
        } => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file_name),
                ),
            ],
            bytes,
        )
            .into_response(),
    }
}

// ============================================================================
// Webhook
// ============================================================================

/// POST /api/webhooks/payments
pub async fn payment_webhook<D: MarketDeps>(
    State(state): State<MarketAppState<D>>,
    headers: HeaderMap,
    body: Bytes,
) -> MarketResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let use_case = IngestWebhookUseCase::new(
        state.repo.clone(),
        state.notifier.clone(),
        state.config.clone(),
    );
    use_case.execute(signature, &body).await?;

    Ok(Json(WebhookAck { received: true }))
}

// ============================================================================
// Downloads
// ============================================================================

/// GET /api/download/{token}
pub async fn download_with_token<D: MarketDeps>(
    State(state): State<MarketAppState<D>>,
    Path(token): Path<String>,
) -> MarketResult<Response> {
    let use_case = DownloadWithTokenUseCase::new(
        state.repo.clone(),
        state.blobs.clone(),
        state.config.clone(),
    );
    let delivery = use_case.execute(&token).await?;
    Ok(file_response(delivery))
}

/// GET /api/resources/{resourceId}/download
pub async fn download_resource<D: MarketDeps>(
    State(state): State<MarketAppState<D>>,
    headers: HeaderMap,
    Path(resource_id): Path<String>,
) -> MarketResult<Response> {
    let user_id = session_user(&headers, &state.config);

    let use_case = DownloadResourceUseCase::new(
        state.repo.clone(),
        state.blobs.clone(),
        state.config.clone(),
    );
    let delivery = use_case.execute(user_id, &resource_id).await?;
    Ok(file_response(delivery))
}

// ============================================================================
// Checkout
// ============================================================================

/// POST /api/checkout
pub async fn checkout<D: MarketDeps>(
    State(state): State<MarketAppState<D>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CheckoutRequest>,
) -> MarketResult<Json<CheckoutResponse>> {
    let use_case = CheckoutUseCase::new(
        state.repo.clone(),
        state.gateway.clone(),
        state.config.clone(),
    );

    let output = use_case
        .execute(CheckoutInput {
            user_id: session_user(&headers, &state.config),
            resource_id: req.resource_id,
            guest_email: req.guest_email,
        })
        .await?;

    Ok(Json(CheckoutResponse {
        checkout_url: output.checkout_url,
        session_id: output.session_id,
    }))
}

/// GET /api/checkout-session/{sessionId}
pub async fn checkout_session<D: MarketDeps>(
    State(state): State<MarketAppState<D>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> MarketResult<Json<CheckoutSessionResponse>> {
    let use_case = CheckoutSessionUseCase::new(state.repo.clone(), state.config.clone());
    let output = use_case
        .execute(session_user(&headers, &state.config), &session_id)
        .await?;

    Ok(Json(CheckoutSessionResponse {
        transaction_id: output.transaction_id.to_string(),
        session_id: output.session_id,
        amount: output.amount,
        formatted_amount: output.formatted_amount,
        status: output.status.code().to_string(),
        resource: ResourceSummary {
            id: output.resource_id.to_string(),
            title: output.resource_title,
        },
    }))
}

// ============================================================================
// Registration
// ============================================================================

/// POST /api/auth/register
pub async fn register<D: MarketDeps>(
    State(state): State<MarketAppState<D>>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> MarketResult<Response> {
    let use_case = RegisterUseCase::new(state.repo.clone(), state.config.clone());

    let output = use_case
        .execute(RegisterInput {
            email: req.email,
            password: req.password,
            display_name: req.display_name,
        })
        .await?;

    let cookie = platform::cookie::set_cookie_header(
        &state.config.session_cookie(),
        &output.session_token,
    )
    .ok_or_else(|| MarketError::Internal("session cookie not encodable".into()))?;

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(RegisterResponse {
            user_id: output.user_id.to_string(),
            linked_purchases: output.linked_purchases,
        }),
    )
        .into_response())
}
