//! # hirewire-server
//!
//! Real-time messaging server for the Hirewire job marketplace.
//!
//! This binary provides:
//! - **Connection Gateway**: authenticated WebSocket endpoint carrying the
//!   live chat events (send, typing, read receipts, presence)
//! - **Delivery Coordinator**: persists every message before pushing it live
//!   to an online receiver
//! - **Conversation Aggregator**: per-user conversation lists and history,
//!   derived from the message store on demand
//! - **REST API** (axum) for conversations, history, send, read receipts,
//!   connectable users and online presence
//! - **Per-IP and per-user rate limiting** to protect against abuse

mod aggregator;
mod api;
mod auth;
mod config;
mod coordinator;
mod error;
mod gateway;
mod presence;
mod rate_limit;
mod store;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hirewire_store::Database;

use crate::aggregator::ConversationAggregator;
use crate::api::AppState;
use crate::auth::JwtVerifier;
use crate::config::ServerConfig;
use crate::coordinator::DeliveryCoordinator;
use crate::presence::PresenceRegistry;
use crate::rate_limit::RateLimiter;
use crate::store::{MessageStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hirewire_server=debug")),
        )
        .init();

    info!("Starting Hirewire messaging server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.jwt_secret.is_insecure_default() {
        warn!("JWT_SECRET not set, using the development secret; do not run like this in production");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Message store (creates the database file and runs migrations)
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default()?,
    };
    info!(path = ?db.path(), "Database opened");
    let store = Arc::new(SqliteStore::new(db, config.store_timeout));
    let messages: Arc<dyn MessageStore> = store.clone();

    // Presence is process-local and shared by the gateway and coordinator
    let presence = Arc::new(PresenceRegistry::new());
    let coordinator = Arc::new(DeliveryCoordinator::new(messages.clone(), presence));
    let aggregator = Arc::new(ConversationAggregator::new(messages, store.clone()));

    // REST: per IP. Live sends: per user.
    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);
    let send_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let verifier = Arc::new(JwtVerifier::new(config.jwt_secret.expose()));

    let app_state = AppState {
        coordinator,
        aggregator,
        users: store,
        verifier,
        rate_limiter: rate_limiter.clone(),
        send_limiter: send_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(600.0).await;
            send_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
