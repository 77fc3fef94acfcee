//! ICE server list construction.
//!
//! Mirrors the distilled `ice_config.py`: a fixed pair of public STUN
//! servers is always present; a TURN entry is appended to the client-facing
//! list only when a TURN host and password are configured. Worker-to-worker
//! (mesh) connections get STUN only, since workers are expected to share a
//! network and not need relaying.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IceConfig {
    stun_servers: Vec<String>,
    turn_host: Option<String>,
    turn_port: String,
    turn_username: String,
    turn_password: Option<String>,
}

impl IceConfig {
    pub fn from_env_and_file(
        stun_servers: Option<Vec<String>>,
        turn_host: Option<String>,
        turn_port: Option<String>,
        turn_username: Option<String>,
        turn_password: Option<String>,
    ) -> Self {
        let stun_servers = stun_servers.unwrap_or_else(|| {
            vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ]
        });
        Self {
            stun_servers,
            turn_host: turn_host.filter(|h| !h.is_empty()),
            turn_port: turn_port.unwrap_or_else(|| "3478".to_string()),
            turn_username: turn_username.unwrap_or_else(|| "meshsignal".to_string()),
            turn_password: turn_password.filter(|p| !p.is_empty()),
        }
    }

    fn stun_entries(&self) -> Vec<IceServer> {
        self.stun_servers
            .iter()
            .map(|url| IceServer {
                urls: vec![url.clone()],
                username: None,
                credential: None,
            })
            .collect()
    }

    /// Client-to-worker ICE servers: STUN plus TURN when configured.
    pub fn client_servers(&self) -> Vec<IceServer> {
        let mut servers = self.stun_entries();
        if let (Some(host), Some(password)) = (&self.turn_host, &self.turn_password) {
            servers.push(IceServer {
                urls: vec![
                    format!("turn:{host}:{port}?transport=udp", port = self.turn_port),
                    format!("turn:{host}:{port}?transport=tcp", port = self.turn_port),
                ],
                username: Some(self.turn_username.clone()),
                credential: Some(password.clone()),
            });
        }
        servers
    }

    /// Worker-to-worker (mesh) ICE servers: STUN only.
    pub fn mesh_servers(&self) -> Vec<IceServer> {
        self.stun_entries()
    }
}
