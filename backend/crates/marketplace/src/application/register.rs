//! Registration Use Case
//!
//! Creates a buyer account, links earlier guest purchases made with the
//! same email, and issues a session token.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{ResourceId, UserId};
use platform::password::ClearTextPassword;

use crate::application::config::MarketConfig;
use crate::domain::entities::NewUser;
use crate::domain::repository::MarketRepository;
use crate::domain::services::issue_session_token;
use crate::domain::value_objects::{Email, UserRole};
use crate::error::{MarketError, MarketResult};

const DISPLAY_NAME_MAX_CHARS: usize = 100;

/// Register input
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

/// Register output
#[derive(Debug)]
pub struct RegisterOutput {
    pub user_id: UserId,
    pub linked_purchases: usize,
    pub session_token: String,
}

/// Register use case
pub struct RegisterUseCase<R>
where
    R: MarketRepository,
{
    repo: Arc<R>,
    config: Arc<MarketConfig>,
}

impl<R> RegisterUseCase<R>
where
    R: MarketRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<MarketConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn execute(&self, input: RegisterInput) -> MarketResult<RegisterOutput> {
        let email = Email::new(input.email)?;
        let display_name = normalize_display_name(input.display_name)?;

        // Validate and hash password
        let password = ClearTextPassword::new(input.password)
            .map_err(|e| MarketError::Validation(e.to_string()))?;

        if self.repo.email_exists(&email).await? {
            return Err(MarketError::EmailTaken);
        }

        let password_hash = password
            .hash(self.config.pepper())
            .map_err(|e| MarketError::Internal(e.to_string()))?;

        let user = NewUser {
            id: UserId::new(),
            email,
            password_hash: password_hash.as_phc_string().to_string(),
            display_name,
            role: UserRole::Buyer,
        };
        self.repo.create_user(&user).await?;

        tracing::info!(user_id = %user.id, "User registered");

        let linked = LinkGuestPurchasesUseCase::new(self.repo.clone())
            .execute(&user.email, &user.id)
            .await;

        let expires_at_ms = Utc::now().timestamp_millis() + self.config.session_ttl_ms();
        let session_token =
            issue_session_token(&user.id, expires_at_ms, &self.config.session_secret);

        Ok(RegisterOutput {
            user_id: user.id,
            linked_purchases: linked.len(),
            session_token,
        })
    }
}

fn normalize_display_name(name: Option<String>) -> MarketResult<Option<String>> {
    let Some(name) = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > DISPLAY_NAME_MAX_CHARS {
        return Err(MarketError::Validation(format!(
            "Display name must be at most {} characters",
            DISPLAY_NAME_MAX_CHARS
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(MarketError::Validation(
            "Display name contains invalid characters".into(),
        ));
    }
    Ok(Some(name))
}

// ============================================================================
// Guest linking
// ============================================================================

/// Guest-linking use case
///
/// Best effort: a failure is logged and reported as nothing linked.
pub struct LinkGuestPurchasesUseCase<R>
where
    R: MarketRepository,
{
    repo: Arc<R>,
}

impl<R> LinkGuestPurchasesUseCase<R>
where
    R: MarketRepository,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, email: &Email, user_id: &UserId) -> Vec<ResourceId> {
        match self.repo.link_guest_purchases(email, user_id).await {
            Ok(resources) => {
                if !resources.is_empty() {
                    tracing::info!(user_id = %user_id, linked = resources.len(), "Guest purchases linked to new account");
                }
                resources
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Guest purchase linking failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_normalization() {
        assert_eq!(normalize_display_name(None).unwrap(), None);
        assert_eq!(normalize_display_name(Some("   ".into())).unwrap(), None);
        assert_eq!(
            normalize_display_name(Some("  Frau Muster ".into())).unwrap(),
            Some("Frau Muster".into())
        );
        assert!(normalize_display_name(Some("x".repeat(101))).is_err());
        assert!(normalize_display_name(Some("a\u{0007}b".into())).is_err());
    }
}
