//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but application-level
//! errors should use `marketplace::AppError`.

mod settings;

use axum::{
    Router, http,
    http::{Method, header},
};
use marketplace::infra::{
    AnyBlobStore, FsBlobStore, HttpMailNotifier, LoggingNotifier, Notifier, SignedUrlBlobStore,
    StripeGateway,
};
use marketplace::{MarketAppState, PgMarketDeps, PgMarketRepository, marketplace_router};
use platform::rate_limit::MemoryRateLimitStore;
use settings::{Settings, StorageSettings};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,marketplace=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    // Database connection
    let pool = PgPoolOptions::new()
        .max_connections(settings.database_max_connections)
        .connect(&settings.database_url)
        .await?;

    tracing::info!(
        max_connections = settings.database_max_connections,
        "Connected to database"
    );

    // Run migrations
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    // Outbound HTTP client shared by gateway, mail API and remote storage
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let gateway = StripeGateway::new(
        http_client.clone(),
        settings.gateway_api_base.clone(),
        settings.gateway_secret_key.clone(),
    );

    let notifier = match &settings.mail {
        Some(mail) => {
            tracing::info!("Purchase confirmations via mail API");
            Notifier::Http(HttpMailNotifier::new(
                http_client.clone(),
                mail.url.clone(),
                mail.api_key.clone(),
            ))
        }
        None => {
            tracing::warn!("MAIL_API_URL not set, purchase confirmations are only logged");
            Notifier::Logging(LoggingNotifier)
        }
    };

    let blobs = match &settings.storage {
        StorageSettings::Local { root } => {
            tracing::info!(root = %root.display(), "Serving files from local storage");
            AnyBlobStore::Fs(FsBlobStore::new(root.clone()))
        }
        StorageSettings::Remote {
            base_url,
            signing_secret,
        } => {
            tracing::info!(base_url = %base_url, "Redirecting downloads to remote storage");
            AnyBlobStore::Remote(SignedUrlBlobStore::new(
                http_client.clone(),
                base_url.clone(),
                signing_secret.clone(),
            ))
        }
    };

    let state = MarketAppState::<PgMarketDeps>::new(
        PgMarketRepository::new(pool.clone()),
        gateway,
        notifier,
        blobs,
        MemoryRateLimitStore::new(),
        settings.market.clone(),
    );

    // CORS configuration
    let allowed_origins: Vec<http::HeaderValue> = settings
        .frontend_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    // Build router
    let app = Router::new()
        .nest("/api", marketplace_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    tracing::info!("Listening on {}", settings.bind_addr);

    let listener = TcpListener::bind(settings.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
