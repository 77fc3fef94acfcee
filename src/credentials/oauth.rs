//! OAuth authorization-code exchange. A small trait keeps the HTTP control
//! plane decoupled from the concrete provider so a different provider (or a
//! mock, in tests) can be substituted without touching the handler.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub provider_user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait OAuthClient: Send + Sync {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AppResult<OAuthProfile>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    email: Option<String>,
    avatar_url: Option<String>,
}

pub struct GithubOAuthClient {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

impl GithubOAuthClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build oauth http client");
        Self {
            client_id,
            client_secret,
            http,
        }
    }
}

#[async_trait]
impl OAuthClient for GithubOAuthClient {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AppResult<OAuthProfile> {
        let token: TokenResponse = self
            .http
            .post("https://github.com/login/oauth/access_token")
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AppError::UpstreamFailure(format!("oauth token exchange: {e}")))?;

        let user: GithubUser = self
            .http
            .get("https://api.github.com/user")
            .bearer_auth(&token.access_token)
            .header("User-Agent", "meshsignal")
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AppError::UpstreamFailure(format!("oauth profile fetch: {e}")))?;

        Ok(OAuthProfile {
            provider_user_id: user.id.to_string(),
            username: user.login,
            email: user.email,
            avatar_url: user.avatar_url,
        })
    }
}
