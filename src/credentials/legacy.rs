//! Legacy Cognito-style JWT validation, kept for backwards compatibility.
//! A JWKS is fetched once at startup and used to verify tokens under a
//! separate issuer; treated as a second Credential Engine instance behind
//! the same shape of `verify` call as [`super::session_token::SessionTokens`].

use std::collections::HashMap;
use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyClaims {
    pub sub: String,
    #[serde(default)]
    pub username: Option<String>,
}

pub struct LegacyVerifier {
    keys_by_kid: HashMap<String, DecodingKey>,
    issuer: String,
}

impl LegacyVerifier {
    /// Fetches the JWKS document once; call again to refresh on a timer.
    pub async fn fetch(jwks_url: &str, issuer: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build jwks http client: {e}")))?;
        let jwks: JwkSet = http
            .get(jwks_url)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AppError::UpstreamFailure(format!("jwks fetch: {e}")))?;

        let mut keys_by_kid = HashMap::new();
        for jwk in jwks.keys {
            let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
                .map_err(|e| AppError::Internal(format!("invalid jwk: {e}")))?;
            keys_by_kid.insert(jwk.kid, key);
        }

        Ok(Self {
            keys_by_kid,
            issuer: issuer.to_string(),
        })
    }

    pub fn verify(&self, token: &str) -> AppResult<LegacyClaims> {
        let header = decode_header(token).map_err(|_| AppError::Unauthenticated)?;
        let kid = header.kid.ok_or(AppError::Unauthenticated)?;
        let key = self.keys_by_kid.get(&kid).ok_or(AppError::Unauthenticated)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        decode::<LegacyClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthenticated)
    }
}
