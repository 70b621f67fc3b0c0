//! Device credential generation and hashing.
//!
//! A registration record pairs a device identifier with a short
//! human-typeable claim code and the SHA-256 hash of a longer verify
//! code. The raw verify code is shown to the caller exactly once at
//! registration time and never persisted.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of the human-typeable registration code.
pub const REG_CODE_LENGTH: usize = 8;

/// Length of the device verify code.
pub const VERIFY_CODE_LENGTH: usize = 16;

const REG_CODE_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789@#";

const VERIFY_CODE_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+[]{}|;:,.<>?";

fn random_string(charset: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}

/// Generate a fresh device identifier.
pub fn generate_device_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a short single-use registration code.
pub fn generate_reg_code() -> String {
    random_string(REG_CODE_CHARSET, REG_CODE_LENGTH)
}

/// Generate a device verify code.
pub fn generate_verify_code() -> String {
    random_string(VERIFY_CODE_CHARSET, VERIFY_CODE_LENGTH)
}

/// Deterministic one-way hash of a verify code, hex encoded.
pub fn hash_verify_code(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    hex::encode(digest)
}
