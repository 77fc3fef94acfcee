//! Server configuration.
//!
//! Values are read from the process environment and optionally overlaid from
//! a TOML file named on the CLI. Loaded once at startup into an immutable
//! [`Config`], validated before the listener binds.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::ice::IceConfig;

#[derive(Parser, Debug)]
#[command(name = "meshsignal", about = "WebRTC rendezvous signaling server")]
pub struct Cli {
    /// Path to an optional TOML config file, applied before environment overrides.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the bind address.
    #[arg(short, long)]
    pub addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct FileConfig {
    bind_addr: Option<String>,
    database_path: Option<String>,
    oauth_client_id: Option<String>,
    oauth_client_secret: Option<String>,
    oauth_redirect_uri: Option<String>,
    legacy_jwks_url: Option<String>,
    legacy_issuer: Option<String>,
    stun_servers: Option<Vec<String>>,
    turn_host: Option<String>,
    turn_port: Option<String>,
    turn_username: Option<String>,
    turn_password: Option<String>,
    max_peers_per_room: Option<usize>,
    ui_origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: String,
    pub session_signing_key_pem: String,
    pub session_verifying_key_pem: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_redirect_uri: String,
    pub legacy_jwks_url: Option<String>,
    pub legacy_issuer: Option<String>,
    pub ice: IceConfig,
    pub max_peers_per_room: usize,
    /// Browser origin the UI is served from. `None` means development mode,
    /// where CORS is left permissive; set in production to lock it down.
    pub ui_origin: Option<String>,
}

const SERVICE_NAME: &str = "meshsignal";

impl Config {
    pub fn service_name() -> &'static str {
        SERVICE_NAME
    }

    /// Load configuration from an optional file, then environment overrides,
    /// then CLI overrides (highest priority).
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let file_cfg: FileConfig = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("invalid config file {}: {e}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let bind_addr = cli
            .addr
            .clone()
            .or_else(|| std::env::var("BIND_ADDR").ok())
            .or(file_cfg.bind_addr)
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid BIND_ADDR: {e}"))?;

        let database_path = std::env::var("DATABASE_PATH")
            .ok()
            .or(file_cfg.database_path)
            .unwrap_or_else(|| "data/meshsignal.db".to_string());

        let session_signing_key_pem = unescape_pem(
            &std::env::var("SESSION_SIGNING_KEY")
                .map_err(|_| anyhow::anyhow!("SESSION_SIGNING_KEY is required"))?,
        );
        let session_verifying_key_pem = unescape_pem(
            &std::env::var("SESSION_VERIFYING_KEY")
                .map_err(|_| anyhow::anyhow!("SESSION_VERIFYING_KEY is required"))?,
        );

        let oauth_client_id = std::env::var("OAUTH_CLIENT_ID")
            .ok()
            .or(file_cfg.oauth_client_id)
            .unwrap_or_default();
        let oauth_client_secret = std::env::var("OAUTH_CLIENT_SECRET")
            .ok()
            .or(file_cfg.oauth_client_secret)
            .unwrap_or_default();
        let oauth_redirect_uri = std::env::var("OAUTH_REDIRECT_URI")
            .ok()
            .or(file_cfg.oauth_redirect_uri)
            .unwrap_or_default();

        let legacy_jwks_url = std::env::var("LEGACY_JWKS_URL").ok().or(file_cfg.legacy_jwks_url);
        let legacy_issuer = std::env::var("LEGACY_ISSUER").ok().or(file_cfg.legacy_issuer);

        let ice = IceConfig::from_env_and_file(
            file_cfg.stun_servers,
            std::env::var("TURN_HOST").ok().or(file_cfg.turn_host),
            std::env::var("TURN_PORT").ok().or(file_cfg.turn_port),
            std::env::var("TURN_USERNAME").ok().or(file_cfg.turn_username),
            std::env::var("TURN_PASSWORD").ok().or(file_cfg.turn_password),
        );

        let max_peers_per_room = std::env::var("MAX_PEERS_PER_ROOM")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file_cfg.max_peers_per_room)
            .unwrap_or(64);

        let ui_origin = std::env::var("UI_ORIGIN").ok().or(file_cfg.ui_origin);

        let cfg = Config {
            bind_addr,
            database_path,
            session_signing_key_pem,
            session_verifying_key_pem,
            oauth_client_id,
            oauth_client_secret,
            oauth_redirect_uri,
            legacy_jwks_url,
            legacy_issuer,
            ice,
            max_peers_per_room,
            ui_origin,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_peers_per_room == 0 {
            anyhow::bail!("MAX_PEERS_PER_ROOM must be greater than zero");
        }
        if self.session_signing_key_pem.is_empty() || self.session_verifying_key_pem.is_empty() {
            anyhow::bail!("session signing keypair must not be empty");
        }
        Ok(())
    }
}

/// Newline-in-env-var workaround: callers may encode `\n` as `|` so a PEM
/// blob survives a single-line `.env` file; undo that here.
fn unescape_pem(raw: &str) -> String {
    raw.replace('|', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_pem_restores_newlines() {
        assert_eq!(unescape_pem("a|b|c"), "a\nb\nc");
    }

    #[test]
    fn file_config_reads_flat_keys() {
        let cfg: FileConfig = toml::from_str(
            "bind_addr = \"127.0.0.1:9000\"\n# comment\nmax_peers_per_room = 12\n",
        )
        .unwrap();
        assert_eq!(cfg.bind_addr.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(cfg.max_peers_per_room, Some(12));
    }

    #[test]
    fn file_config_reads_stun_servers_array() {
        let cfg: FileConfig = toml::from_str(
            "stun_servers = [\"stun:a.example\", \"stun:b.example\"]\nui_origin = \"https://app.example\"\n",
        )
        .unwrap();
        assert_eq!(
            cfg.stun_servers,
            Some(vec!["stun:a.example".to_string(), "stun:b.example".to_string()])
        );
        assert_eq!(cfg.ui_origin.as_deref(), Some("https://app.example"));
    }
}
