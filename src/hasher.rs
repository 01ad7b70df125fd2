//! One-way hashing and verification for secrets.
//!
//! The same Argon2id primitive covers passwords, API keys, and client
//! secrets. Backup codes use a fast SHA-256 digest instead (see `totp`),
//! since they are high-entropy, single-use random values.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;

#[derive(Clone, Default)]
pub struct CredentialHasher;

impl CredentialHasher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produce a salted Argon2id digest in PHC string format.
    ///
    /// # Errors
    /// Returns an error if the underlying hash computation fails.
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash secret"))?
            .to_string();
        Ok(digest)
    }

    /// Verify a secret against a stored digest. Malformed digests yield
    /// `false`, never an error.
    #[must_use]
    pub fn verify(&self, secret: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}
