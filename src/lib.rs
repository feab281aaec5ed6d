//! fedisig - ActivityPub request signing and inbox verification
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Inbox/outbox routes (verify, check actor, dispatch)      │
//! │  - Metrics / health                                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - RequestSigner (draft-cavage, RFC 9421, LD, FEP-8b32)     │
//! │  - InboxVerifier / ActorKeyResolver                         │
//! │  - ActivityPubClient                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - KeyCache over a TTL + per-namespace LRU store            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: inbox, outbox and metrics handlers
//! - `federation`: signing, verification, key resolution, outbound client
//! - `data`: key-value store and key cache
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;

use std::sync::Arc;

use federation::{
    ActivityPubClient, ActorFetcher, ActorKeyResolver, HttpActorFetcher, InboxVerifier,
    RequestSigner, SIGNATURE_NAMESPACE, StandardSuite,
};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Inbox verification pipeline
    pub verifier: InboxVerifier,

    /// Outbound signer
    pub signer: RequestSigner,

    /// Signed HTTP client for federation
    pub client: ActivityPubClient,

    /// Handlers for verified activities
    pub dispatcher: Arc<api::InboxDispatcher>,

    /// Actor key cache
    pub key_cache: data::KeyCache,
}

impl AppState {
    /// Initialize application state with the HTTP actor fetcher
    ///
    /// # Errors
    /// Returns error if the HTTP clients cannot be built
    pub fn new(
        config: config::AppConfig,
        dispatcher: api::InboxDispatcher,
    ) -> Result<Self, error::AppError> {
        let fetcher = Arc::new(HttpActorFetcher::new(&config.federation)?);
        Self::with_fetcher(config, fetcher, dispatcher)
    }

    /// Initialize application state around a given actor fetcher
    pub fn with_fetcher(
        config: config::AppConfig,
        fetcher: Arc<dyn ActorFetcher>,
        dispatcher: api::InboxDispatcher,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let key_cache = data::KeyCache::new(Arc::new(data::InMemoryKv::new()));
        key_cache.configure(SIGNATURE_NAMESPACE, config.cache.signature_max_entries());

        let suite = Arc::new(StandardSuite::new(config.federation.max_clock_skew()));
        let ttl = config.cache.signature_key_ttl()?;
        let resolver = ActorKeyResolver::new(key_cache.clone(), fetcher.clone(), Some(ttl));
        let verifier = InboxVerifier::new(resolver, suite.clone());
        let signer = RequestSigner::new(suite, config.federation.user_agent.clone());
        let client = ActivityPubClient::new(&config.federation, signer.clone(), fetcher)?;

        tracing::info!(
            inbox_paths = ?config.federation.inbox_paths,
            outbox_paths = ?config.federation.outbox_paths,
            sign_with = ?config.federation.sign_with,
            "Application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            verifier,
            signer,
            client,
            dispatcher: Arc::new(dispatcher),
            key_cache,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::mailbox_router(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
