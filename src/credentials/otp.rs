//! Room OTP secret issuance. The server transports this secret to authorized
//! workers; it never evaluates TOTP codes itself.

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use zeroize::Zeroize;

pub fn issue_otp_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = BASE32_NOPAD.encode(&bytes);
    bytes.zeroize();
    encoded
}

/// `otpauth://` URI form, for display in room-creation responses.
pub fn otp_uri(service_name: &str, room_id: &str, secret: &str) -> String {
    format!("otpauth://totp/{service_name}:{room_id}?secret={secret}&issuer={service_name}")
}
