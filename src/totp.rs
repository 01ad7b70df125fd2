//! Time-based one-time codes and static backup codes.
//!
//! TOTP uses the standard 6-digit, 30-second step with a one-step drift
//! window. Backup codes are random grouped hex, digested with SHA-256: they
//! are high-entropy single-use values, so the slow Argon2 path would add
//! cost without adding guess resistance.

use anyhow::{anyhow, Result};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

const BACKUP_CODE_BYTES: usize = 5;
const BACKUP_CODE_GROUP_SIZE: usize = 5;

/// Enrollment material returned to the caller. Nothing is persisted until
/// the first code verifies.
#[derive(Debug)]
pub struct Enrollment {
    pub secret_base32: String,
    pub provisioning_uri: String,
    /// PNG QR code as a `data:image/png;base64,...` URL.
    pub qr_data_url: String,
}

#[derive(Clone, Debug)]
pub struct TotpEngine {
    issuer: String,
}

impl TotpEngine {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Generate a fresh random secret and a scannable enrollment payload.
    ///
    /// # Errors
    /// Returns an error if secret generation or QR rendering fails.
    pub fn generate_enrollment(&self, account_label: &str) -> Result<Enrollment> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("secret generation failed: {e:?}"))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|e| anyhow!("totp init failed: {e}"))?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("qr generation failed: {e}"))?;

        Ok(Enrollment {
            secret_base32: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
            qr_data_url: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Validate a time-drifting code against a base32 secret. Never errors;
    /// any failure (bad secret, clock trouble, wrong code) yields `false`.
    #[must_use]
    pub fn verify_code(&self, code: &str, secret_base32: &str) -> bool {
        let Ok(secret_bytes) = Secret::Encoded(secret_base32.to_string()).to_bytes() else {
            return false;
        };
        let Ok(totp) = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            "account".to_string(),
        ) else {
            return false;
        };
        totp.check_current(code.trim()).unwrap_or(false)
    }

    /// Cryptographically random backup codes formatted for human
    /// transcription (grouped hex, e.g. `3f9a1-bc04d`).
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn generate_backup_codes(&self, count: usize) -> Result<Vec<String>> {
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            let mut raw = [0u8; BACKUP_CODE_BYTES];
            OsRng
                .try_fill_bytes(&mut raw)
                .map_err(|e| anyhow!("rng failure: {e}"))?;
            codes.push(format_backup_code(&hex::encode(raw)));
        }
        Ok(codes)
    }
}

fn format_backup_code(hex_body: &str) -> String {
    let mut out = String::with_capacity(hex_body.len() + 1);
    for (idx, chunk) in hex_body.as_bytes().chunks(BACKUP_CODE_GROUP_SIZE).enumerate() {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}

/// Strip grouping and case so users can transcribe codes loosely.
fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Fast one-way digest of a single backup code.
#[must_use]
pub fn hash_backup_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_backup_code(code).as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest a full batch of backup codes.
#[must_use]
pub fn hash_backup_codes(codes: &[String]) -> Vec<String> {
    codes.iter().map(|code| hash_backup_code(code)).collect()
}

/// Set-membership check against stored digests.
#[must_use]
pub fn verify_backup_code(code: &str, digests: &[String]) -> bool {
    let candidate = hash_backup_code(code);
    digests.iter().any(|digest| *digest == candidate)
}

/// Return the digest set with the matching digest removed, or `None` when
/// the code does not match. Call sites must persist the returned set so a
/// consumed code cannot be replayed.
#[must_use]
pub fn consume_backup_code(code: &str, digests: &[String]) -> Option<Vec<String>> {
    let candidate = hash_backup_code(code);
    let position = digests.iter().position(|digest| *digest == candidate)?;
    let mut remaining = digests.to_vec();
    remaining.remove(position);
    Some(remaining)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_produces_scannable_payload() {
        let engine = TotpEngine::new("MedStock");
        let enrollment = engine.generate_enrollment("nurse@ward.test").unwrap();
        assert!(!enrollment.secret_base32.is_empty());
        assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(enrollment.provisioning_uri.contains("MedStock"));
        assert!(enrollment.qr_data_url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn current_code_verifies_and_garbage_does_not() {
        let engine = TotpEngine::new("MedStock");
        let enrollment = engine.generate_enrollment("nurse@ward.test").unwrap();

        let secret_bytes = Secret::Encoded(enrollment.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some("MedStock".to_string()),
            "account".to_string(),
        )
        .unwrap();
        let code = totp.generate_current().unwrap();

        assert!(engine.verify_code(&code, &enrollment.secret_base32));
        assert!(!engine.verify_code("000000", &enrollment.secret_base32));
    }

    #[test]
    fn verify_code_false_on_malformed_input() {
        let engine = TotpEngine::new("MedStock");
        assert!(!engine.verify_code("123456", "not base32 at all!!!"));
        assert!(!engine.verify_code("", ""));
    }

    #[test]
    fn backup_codes_are_grouped_hex() {
        let engine = TotpEngine::new("MedStock");
        let codes = engine.generate_backup_codes(8).unwrap();
        assert_eq!(codes.len(), 8);
        for code in &codes {
            let (left, right) = code.split_once('-').unwrap();
            assert_eq!(left.len(), BACKUP_CODE_GROUP_SIZE);
            assert_eq!(right.len(), BACKUP_CODE_GROUP_SIZE);
            assert!(code
                .chars()
                .all(|ch| ch.is_ascii_hexdigit() || ch == '-'));
        }
    }

    #[test]
    fn hashing_tolerates_loose_transcription() {
        assert_eq!(hash_backup_code("3f9a1-bc04d"), hash_backup_code("3F9A1BC04D"));
        assert_ne!(hash_backup_code("3f9a1-bc04d"), hash_backup_code("3f9a1-bc04e"));
    }

    #[test]
    fn consume_removes_exactly_one_digest() {
        let engine = TotpEngine::new("MedStock");
        let codes = engine.generate_backup_codes(4).unwrap();
        let digests = hash_backup_codes(&codes);

        assert!(verify_backup_code(&codes[1], &digests));
        let remaining = consume_backup_code(&codes[1], &digests).unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(!verify_backup_code(&codes[1], &remaining));
        assert!(verify_backup_code(&codes[0], &remaining));

        assert!(consume_backup_code(&codes[1], &remaining).is_none());
        assert!(consume_backup_code("fffff-fffff", &digests).is_none());
    }
}
