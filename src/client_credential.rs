//! Client-credential pairs for machine-to-machine calls.
//!
//! Mirrors the API-key scheme but issues a public `client_id` alongside a
//! random secret. Only the secret is sensitive; the id is a lookup handle.

use anyhow::Result;
use rand::{rngs::OsRng, RngCore};

use crate::hasher::CredentialHasher;

/// Literal tag every client id starts with.
pub const CLIENT_ID_TAG: &str = "msc_";
const CLIENT_ID_BODY_LEN: usize = 24;
const CLIENT_SECRET_LEN: usize = 64;

pub use crate::api_key::is_expired;

/// Freshly generated pair. `client_secret` is shown to the caller exactly
/// once.
#[derive(Debug)]
pub struct IssuedClientCredential {
    pub client_id: String,
    pub client_secret: String,
    pub secret_hash: String,
}

#[derive(Clone, Default)]
pub struct ClientCredentialScheme {
    hasher: CredentialHasher,
}

impl ClientCredentialScheme {
    #[must_use]
    pub fn new(hasher: CredentialHasher) -> Self {
        Self { hasher }
    }

    /// Generate a `client_id`/`client_secret` pair and the secret's hash.
    ///
    /// # Errors
    /// Returns an error if the system RNG or the hasher fails.
    pub fn generate(&self) -> Result<IssuedClientCredential> {
        let client_id = format!("{CLIENT_ID_TAG}{}", random_hex(CLIENT_ID_BODY_LEN)?);
        let client_secret = random_hex(CLIENT_SECRET_LEN)?;
        let secret_hash = self.hasher.hash(&client_secret)?;
        Ok(IssuedClientCredential {
            client_id,
            client_secret,
            secret_hash,
        })
    }

    /// Verify a presented secret against a stored hash.
    #[must_use]
    pub fn verify(&self, client_secret: &str, stored_hash: &str) -> bool {
        self.hasher.verify(client_secret, stored_hash)
    }
}

fn random_hex(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len / 2];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow::anyhow!("rng failure: {e}"))?;
    Ok(hex::encode(bytes))
}
