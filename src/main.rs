use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshsignal::config::{Cli, Config};
use meshsignal::credentials::{LegacyVerifier, SessionTokens};
use meshsignal::http::build_router;
use meshsignal::state::AppState;
use meshsignal::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    let store = Store::open(&config.database_path)?;
    let session_tokens = SessionTokens::new(
        &config.session_signing_key_pem,
        &config.session_verifying_key_pem,
        Config::service_name(),
    )?;

    let bind_addr = config.bind_addr;
    let legacy_jwks_url = config.legacy_jwks_url.clone();
    let legacy_issuer = config.legacy_issuer.clone();

    let state = AppState::new(config, store, session_tokens);

    if let (Some(jwks_url), Some(issuer)) = (legacy_jwks_url, legacy_issuer) {
        match LegacyVerifier::fetch(&jwks_url, &issuer).await {
            Ok(verifier) => {
                *state.legacy_verifier.write().await = Some(verifier);
                info!("legacy JWKS verifier loaded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load legacy JWKS at startup, legacy auth disabled");
            }
        }
    }

    spawn_janitor(state.clone());

    let app = build_router(state);

    info!(%bind_addr, "meshsignal listening");
    let listener = TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Background sweep for rooms whose TTL has passed. Not load-bearing: stale
/// rooms are also filtered out at `register` time, so a missed sweep cycle
/// cannot strand a client in an expired room.
fn spawn_janitor(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            let now = meshsignal::util::now_epoch();
            match state.store.sweep_expired_rooms(now) {
                Ok(n) if n > 0 => info!(count = n, "swept expired rooms"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "room sweep failed"),
            }
            state.invites.sweep_expired(now);
        }
    });
}
