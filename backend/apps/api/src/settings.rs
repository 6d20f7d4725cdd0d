//! Startup settings read from the environment

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose;
use marketplace::MarketConfig;
use marketplace::application::config::SameSite;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Where resource files live
pub enum StorageSettings {
    Local {
        root: PathBuf,
    },
    Remote {
        base_url: String,
        signing_secret: Vec<u8>,
    },
}

/// Mail API credentials; logging notifier when absent
pub struct MailSettings {
    pub url: String,
    pub api_key: String,
}

pub struct Settings {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub frontend_origins: Vec<String>,
    pub gateway_api_base: String,
    pub gateway_secret_key: String,
    pub storage: StorageSettings,
    pub mail: Option<MailSettings>,
    pub market: MarketConfig,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> anyhow::Result<String> {
    var(name).with_context(|| format!("{name} must be set in environment"))
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?,
            None => 5,
        };

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:31113".to_string())
            .parse()
            .context("BIND_ADDR must be host:port")?;

        let frontend_origins = var("FRONTEND_ORIGINS")
            .unwrap_or_else(|| "http://localhost:40922,http://127.0.0.1:40922".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let storage = match (
            var("STORAGE_LOCAL_ROOT"),
            var("STORAGE_REMOTE_BASE_URL"),
        ) {
            (Some(root), _) => StorageSettings::Local { root: root.into() },
            (None, Some(base_url)) => StorageSettings::Remote {
                base_url,
                signing_secret: required("STORAGE_SIGNING_SECRET")?.into_bytes(),
            },
            (None, None) => {
                bail!("either STORAGE_LOCAL_ROOT or STORAGE_REMOTE_BASE_URL must be set")
            }
        };

        let mail = match (var("MAIL_API_URL"), var("MAIL_API_KEY")) {
            (Some(url), Some(api_key)) => Some(MailSettings { url, api_key }),
            _ => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections,
            bind_addr,
            frontend_origins,
            gateway_api_base: var("PAYMENT_GATEWAY_API_BASE")
                .unwrap_or_else(|| marketplace::infra::stripe::DEFAULT_API_BASE.to_string()),
            gateway_secret_key: required("PAYMENT_GATEWAY_SECRET_KEY")?,
            storage,
            mail,
            market: market_config()?,
        })
    }
}

fn market_config() -> anyhow::Result<MarketConfig> {
    let base = if cfg!(debug_assertions) {
        MarketConfig::development()
    } else {
        MarketConfig::default()
    };

    let session_secret = match var("SESSION_SECRET") {
        Some(secret_b64) => {
            let bytes = general_purpose::STANDARD
                .decode(secret_b64.trim())
                .context("SESSION_SECRET must be base64")?;
            let secret: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("SESSION_SECRET must decode to 32 bytes"))?;
            secret
        }
        // Debug builds fall back to the random development secret
        None if cfg!(debug_assertions) => base.session_secret,
        None => bail!("SESSION_SECRET must be set in production"),
    };

    let cookie_same_site = match var("COOKIE_SAME_SITE") {
        Some(v) => SameSite::parse(&v).context("COOKIE_SAME_SITE must be Strict, Lax or None")?,
        None => base.cookie_same_site,
    };

    Ok(MarketConfig {
        webhook_secret: required("PAYMENT_WEBHOOK_SECRET")?.into_bytes(),
        session_secret,
        cookie_same_site,
        app_base_url: var("APP_BASE_URL").unwrap_or(base.app_base_url.clone()),
        currency: var("CURRENCY")
            .map(|c| c.to_lowercase())
            .unwrap_or(base.currency.clone()),
        default_locale: var("DEFAULT_LOCALE").unwrap_or(base.default_locale.clone()),
        password_pepper: var("PASSWORD_PEPPER").map(String::into_bytes),
        ..base
    })
}
