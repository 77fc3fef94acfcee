//! Credential Engine: issues and validates every credential family that
//! crosses the untrusted/trusted boundary — session tokens, worker API keys,
//! room OTP secrets, invite codes, OAuth exchange, and legacy JWKS tokens.

mod invite;
mod legacy;
mod oauth;
mod otp;
mod session_token;
mod worker_key;

pub use invite::InviteTable;
pub use legacy::{LegacyClaims, LegacyVerifier};
pub use oauth::{GithubOAuthClient, OAuthClient, OAuthProfile};
pub use otp::{issue_otp_secret, otp_uri};
pub use session_token::{SessionClaims, SessionTokens};
pub use worker_key::{issue_worker_api_key, WORKER_KEY_PREFIX};
