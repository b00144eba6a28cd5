//! Argon2id password hashing for accounts and share links.

use std::sync::LazyLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{Error, Result};

/// Hash verified for principals that do not exist or are locked, so the
/// denial takes as long as a real verification.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    hash_password("skiff-dummy-credential").expect("hashing a constant cannot fail")
});

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Error::Internal("failed to hash password".to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Burns one verification against the dummy hash and returns `false`.
pub fn verify_against_dummy(password: &str) -> bool {
    let _ = verify_password(password, &DUMMY_HASH);
    false
}
