//! Opaque API keys: generation, header extraction, and verification.
//!
//! Issued keys look like `msk_<64 hex chars>`. The first [`KEY_PREFIX_LEN`]
//! characters double as a non-secret lookup index so the store never needs
//! to scan hashes; the full key is hashed with the slow credential hasher
//! and never stored.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};

use crate::hasher::CredentialHasher;

/// Literal tag every issued key starts with.
pub const KEY_TAG: &str = "msk_";
/// Hex characters in the random key body.
pub const KEY_BODY_LEN: usize = 64;
/// Length of the stored lookup prefix, tag included.
pub const KEY_PREFIX_LEN: usize = 12;

const API_KEY_SCHEME: &str = "ApiKey ";
const BEARER_SCHEME: &str = "Bearer ";

/// Freshly generated key material. `full_key` is shown to the caller
/// exactly once.
#[derive(Debug)]
pub struct IssuedApiKey {
    pub full_key: String,
    pub hash: String,
    pub prefix: String,
}

#[derive(Clone, Default)]
pub struct ApiKeyScheme {
    hasher: CredentialHasher,
}

impl ApiKeyScheme {
    #[must_use]
    pub fn new(hasher: CredentialHasher) -> Self {
        Self { hasher }
    }

    /// Generate a key, its slow hash, and its lookup prefix.
    ///
    /// # Errors
    /// Returns an error if the system RNG or the hasher fails.
    pub fn generate(&self) -> Result<IssuedApiKey> {
        let mut body = [0u8; KEY_BODY_LEN / 2];
        OsRng
            .try_fill_bytes(&mut body)
            .map_err(|e| anyhow::anyhow!("rng failure: {e}"))?;
        let full_key = format!("{KEY_TAG}{}", hex::encode(body));
        let hash = self.hasher.hash(&full_key)?;
        let prefix = full_key
            .chars()
            .take(KEY_PREFIX_LEN)
            .collect::<String>();
        Ok(IssuedApiKey {
            full_key,
            hash,
            prefix,
        })
    }

    /// Verify a presented key against a stored hash.
    #[must_use]
    pub fn verify(&self, provided_key: &str, stored_hash: &str) -> bool {
        self.hasher.verify(provided_key, stored_hash)
    }
}

/// Pull a candidate key out of an authorization-style header value.
/// Accepts `Bearer <key>`, `ApiKey <key>`, or a bare tagged key.
#[must_use]
pub fn extract_from_header(header_value: &str) -> Option<String> {
    let trimmed = header_value.trim();
    let candidate = trimmed
        .strip_prefix(BEARER_SCHEME)
        .or_else(|| trimmed.strip_prefix(API_KEY_SCHEME))
        .map_or(trimmed, str::trim);
    if candidate.starts_with(KEY_TAG) {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// Strict format check used to reject malformed keys before any storage
/// lookup.
#[must_use]
pub fn is_valid_format(key: &str) -> bool {
    let Some(body) = key.strip_prefix(KEY_TAG) else {
        return false;
    };
    body.len() == KEY_BODY_LEN
        && body
            .chars()
            .all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase())
}

#[must_use]
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|deadline| deadline <= now)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn generated_keys_have_the_documented_shape() {
        let scheme = ApiKeyScheme::default();
        let issued = scheme.generate().unwrap();
        assert!(is_valid_format(&issued.full_key));
        assert_eq!(issued.full_key.len(), KEY_TAG.len() + KEY_BODY_LEN);
        assert_eq!(issued.prefix.len(), KEY_PREFIX_LEN);
        assert!(issued.full_key.starts_with(&issued.prefix));
        assert!(scheme.verify(&issued.full_key, &issued.hash));
    }

    #[test]
    fn single_character_mutation_defeats_verification() {
        let scheme = ApiKeyScheme::default();
        let issued = scheme.generate().unwrap();
        let mut mutated = issued.full_key.clone();
        let last = mutated.pop().unwrap();
        mutated.push(if last == '0' { '1' } else { '0' });
        // Same prefix, so a prefix lookup would still find the record.
        assert!(mutated.starts_with(&issued.prefix));
        assert!(!scheme.verify(&mutated, &issued.hash));
    }

    #[test]
    fn extraction_accepts_all_supported_header_shapes() {
        let key = format!("{KEY_TAG}{}", "a".repeat(KEY_BODY_LEN));
        assert_eq!(extract_from_header(&format!("Bearer {key}")).as_deref(), Some(key.as_str()));
        assert_eq!(extract_from_header(&format!("ApiKey {key}")).as_deref(), Some(key.as_str()));
        assert_eq!(extract_from_header(&key).as_deref(), Some(key.as_str()));
        assert_eq!(extract_from_header("Bearer eyJhbGciOi.some.jwt"), None);
        assert_eq!(extract_from_header(""), None);
    }

    #[test]
    fn format_check_is_strict() {
        assert!(!is_valid_format("msk_short"));
        assert!(!is_valid_format(&format!("msk_{}", "g".repeat(KEY_BODY_LEN))));
        assert!(!is_valid_format(&format!("msk_{}", "A".repeat(KEY_BODY_LEN))));
        assert!(!is_valid_format(&format!("key_{}", "a".repeat(KEY_BODY_LEN))));
        assert!(is_valid_format(&format!("msk_{}", "0".repeat(KEY_BODY_LEN))));
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        assert!(!is_expired(None, now));
        assert!(!is_expired(Some(now + Duration::hours(1)), now));
        assert!(is_expired(Some(now - Duration::seconds(1)), now));
        assert!(is_expired(Some(now), now));
    }
}
