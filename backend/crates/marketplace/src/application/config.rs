//! Application Configuration
//!
//! Configuration for the Marketplace application layer.

use std::time::Duration;

use platform::cookie::CookieConfig;
use platform::rate_limit::RateLimitConfig;

/// Re-export SameSite from platform
pub use platform::cookie::SameSite;

/// Per-route-class request limits
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub registration: RateLimitConfig,
    pub checkout: RateLimitConfig,
    pub download: RateLimitConfig,
    pub checkout_session: RateLimitConfig,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            registration: RateLimitConfig::new(5, 60),
            checkout: RateLimitConfig::new(10, 60),
            download: RateLimitConfig::new(30, 60),
            checkout_session: RateLimitConfig::new(60, 60),
        }
    }
}

/// Marketplace application configuration
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Platform fee in basis points (3000 = 30%)
    pub platform_fee_bps: u32,
    /// ISO currency code sent to the gateway
    pub currency: String,
    /// Guest download token quota
    pub guest_max_downloads: i32,
    /// Guest download token lifetime (7 days)
    pub guest_token_ttl: Duration,
    /// Random bytes per download token
    pub download_token_bytes: usize,
    /// Webhook signing secret shared with the gateway
    pub webhook_secret: Vec<u8>,
    /// Allowed clock skew for webhook signatures
    pub webhook_tolerance: Duration,
    /// Lifetime of signed blob URLs
    pub signed_url_ttl: Duration,
    /// Public base URL for checkout success/cancel redirects
    pub app_base_url: String,
    /// Locale for purchase confirmation mails
    pub default_locale: String,
    /// Session cookie name
    pub session_cookie_name: String,
    /// Session secret key for HMAC signing (32 bytes)
    pub session_secret: [u8; 32],
    /// Session TTL (1 week)
    pub session_ttl: Duration,
    /// Whether to require Secure cookie
    pub cookie_secure: bool,
    /// SameSite policy
    pub cookie_same_site: SameSite,
    /// Password pepper (optional, application-wide secret)
    pub password_pepper: Option<Vec<u8>>,
    pub rate_limits: RateLimits,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: 3000,
            currency: "chf".to_string(),
            guest_max_downloads: 3,
            guest_token_ttl: Duration::from_secs(7 * 24 * 3600), // 7 days
            download_token_bytes: 32,
            webhook_secret: Vec::new(),
            webhook_tolerance: Duration::from_secs(300),
            signed_url_ttl: Duration::from_secs(300),
            app_base_url: "http://localhost:3000".to_string(),
            default_locale: "de".to_string(),
            session_cookie_name: "mp_session".to_string(),
            session_secret: [0u8; 32],
            session_ttl: Duration::from_secs(7 * 24 * 3600), // 1 week
            cookie_secure: true,
            cookie_same_site: SameSite::Lax,
            password_pepper: None,
            rate_limits: RateLimits::default(),
        }
    }
}

impl MarketConfig {
    /// Create config with a random session secret (for development)
    pub fn with_random_secret() -> Self {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&platform::crypto::random_bytes(32));
        Self {
            session_secret: secret,
            ..Default::default()
        }
    }

    /// Create config for development (insecure cookie)
    pub fn development() -> Self {
        Self {
            cookie_secure: false,
            ..Self::with_random_secret()
        }
    }

    /// Guest token lifetime as a chrono duration
    pub fn guest_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.guest_token_ttl).unwrap_or(chrono::Duration::days(7))
    }

    pub fn session_ttl_ms(&self) -> i64 {
        self.session_ttl.as_millis() as i64
    }

    /// Session cookie attributes
    pub fn session_cookie(&self) -> CookieConfig {
        CookieConfig {
            name: self.session_cookie_name.clone(),
            secure: self.cookie_secure,
            http_only: true,
            same_site: self.cookie_same_site,
            path: "/".to_string(),
            max_age_secs: Some(self.session_ttl.as_secs() as i64),
        }
    }

    /// Get password pepper as slice
    pub fn pepper(&self) -> Option<&[u8]> {
        self.password_pepper.as_deref()
    }

    pub fn checkout_success_url(&self) -> String {
        format!(
            "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.app_base_url.trim_end_matches('/')
        )
    }

    pub fn checkout_cancel_url(&self, resource_id: &kernel::id::ResourceId) -> String {
        format!(
            "{}/resources/{}",
            self.app_base_url.trim_end_matches('/'),
            resource_id
        )
    }
}
