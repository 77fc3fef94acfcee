//! Long-lived worker API keys: 192 random bits, URL-safe base64, prefixed so
//! they're visually distinguishable from session tokens and OTP secrets.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroize;

pub const WORKER_KEY_PREFIX: &str = "msw_";

pub fn issue_worker_api_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = URL_SAFE_NO_PAD.encode(bytes);
    bytes.zeroize();
    format!("{WORKER_KEY_PREFIX}{encoded}")
}
