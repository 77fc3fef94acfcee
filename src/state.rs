//! Shared application state handed to both the HTTP and WebSocket planes.
//! Everything here is `Arc`-wrapped and cloned per-request/per-connection.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::credentials::{GithubOAuthClient, InviteTable, LegacyVerifier, OAuthClient, SessionTokens};
use crate::metrics::MetricsSink;
use crate::registry::Registry;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
    pub session_tokens: Arc<SessionTokens>,
    pub legacy_verifier: Arc<RwLock<Option<LegacyVerifier>>>,
    pub invites: Arc<InviteTable>,
    pub oauth_client: Arc<dyn OAuthClient>,
    pub metrics: Arc<MetricsSink>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, store: Store, session_tokens: SessionTokens) -> Self {
        let oauth_client = GithubOAuthClient::new(
            config.oauth_client_id.clone(),
            config.oauth_client_secret.clone(),
        );
        Self {
            store: Arc::new(store),
            registry: Arc::new(Registry::new()),
            session_tokens: Arc::new(session_tokens),
            legacy_verifier: Arc::new(RwLock::new(None)),
            invites: Arc::new(InviteTable::new()),
            oauth_client: Arc::new(oauth_client),
            metrics: Arc::new(MetricsSink::new()),
            config: Arc::new(config),
        }
    }
}
