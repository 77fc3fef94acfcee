//! Short-lived session tokens: asymmetric-signed JSON claims identifying an
//! authenticated user, carried as `Authorization: Bearer` on HTTP and as the
//! `jwt` field of a WebSocket `register` message.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// A signing/verification keypair for one service identity. Construction is
/// the only place PEM parsing happens; everything downstream works with the
/// parsed keys.
pub struct SessionTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    service_name: String,
}

impl SessionTokens {
    pub fn new(signing_key_pem: &str, verifying_key_pem: &str, service_name: &str) -> AppResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(signing_key_pem.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid session signing key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(verifying_key_pem.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid session verifying key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[service_name]);
        validation.set_audience(&[service_name]);

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            service_name: service_name.to_string(),
        })
    }

    pub fn issue(&self, user_id: &str, username: &str, now: i64) -> AppResult<String> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            iss: self.service_name.clone(),
            aud: self.service_name.clone(),
        };
        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("failed to sign session token: {e}")))?;
        Ok(token)
    }

    /// Validates signature, issuer, audience, and expiry. Never logs `token`.
    pub fn verify(&self, token: &str) -> AppResult<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthenticated)
    }
}
