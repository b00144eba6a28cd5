//! Time-based one-time passwords (RFC 6238, HMAC-SHA-256 variant, 30 s
//! step, six digits). Secrets are stored URL-safe base64 encoded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{Error, Result};

const STEP_SECONDS: u64 = 30;
const DIGITS: u32 = 6;
/// Accept one step of clock skew in either direction.
const SKEW_STEPS: i64 = 1;

pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The code for one counter step.
fn code_for_step(secret: &[u8], step: u64) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| Error::Internal("invalid totp secret".to_string()))?;
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    Ok(format!(
        "{:0width$}",
        binary % 10u32.pow(DIGITS),
        width = DIGITS as usize
    ))
}

pub fn code_at(secret_b64: &str, unix_seconds: u64) -> Result<String> {
    let secret = URL_SAFE_NO_PAD
        .decode(secret_b64)
        .map_err(|_| Error::Internal("malformed totp secret".to_string()))?;
    code_for_step(&secret, unix_seconds / STEP_SECONDS)
}

/// Verifies a submitted code against the current step plus/minus the skew
/// window, in constant time per candidate.
pub fn verify(secret_b64: &str, code: &str, unix_seconds: u64) -> bool {
    let Ok(secret) = URL_SAFE_NO_PAD.decode(secret_b64) else {
        return false;
    };
    let current = (unix_seconds / STEP_SECONDS) as i64;
    for skew in -SKEW_STEPS..=SKEW_STEPS {
        let step = current + skew;
        if step < 0 {
            continue;
        }
        if let Ok(expected) = code_for_step(&secret, step as u64) {
            if constant_time_eq::constant_time_eq(expected.as_bytes(), code.as_bytes()) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_verifies_within_skew() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        let code = code_at(&secret, now).unwrap();
        assert!(verify(&secret, &code, now));
        assert!(verify(&secret, &code, now + STEP_SECONDS));
        assert!(!verify(&secret, &code, now + 3 * STEP_SECONDS));
    }

    #[test]
    fn wrong_code_fails() {
        let secret = generate_secret();
        assert!(!verify(&secret, "000000", 1_700_000_000));
    }

    #[test]
    fn codes_are_six_digits() {
        let secret = generate_secret();
        let code = code_at(&secret, 12_345_678).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
