//! Compact signed bearer tokens (HS256).
//!
//! Tokens are self-contained: base64url JSON header and claims joined with
//! an HMAC-SHA256 signature. Expiry is the only lifecycle bound; no
//! revocation list is consulted. A `kind` claim separates short-lived
//! temporary login tokens from full session tokens, and verification always
//! pins the expected kind so the two are never interchangeable.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::Account;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Marker distinguishing full session tokens from temporary login tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Session,
    TwoFactor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub kind: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("wrong token kind")]
    WrongKind,
    #[error("invalid key")]
    Key,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Issues and verifies the crate's bearer tokens with the configured
/// symmetric secret. Cheap to clone.
#[derive(Clone)]
pub struct TokenSigner {
    config: Arc<AuthConfig>,
}

impl TokenSigner {
    #[must_use]
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self { config }
    }

    /// Full session token carrying account id, email, and display name.
    ///
    /// # Errors
    /// Returns an error if claims cannot be encoded or signing fails.
    pub fn issue_session(&self, account: &Account) -> Result<String, Error> {
        let now = Utc::now().timestamp();
        self.issue(&Claims {
            sub: account.id.to_string(),
            kind: TokenKind::Session,
            iss: self.config.issuer().to_string(),
            iat: now,
            exp: now + self.config.session_ttl_seconds(),
            email: Some(account.email.clone()),
            name: Some(account.display_name.clone()),
        })
    }

    /// Short-lived token marking that only the primary credential has been
    /// verified, pending a second factor.
    ///
    /// # Errors
    /// Returns an error if claims cannot be encoded or signing fails.
    pub fn issue_two_factor(&self, account_id: Uuid) -> Result<String, Error> {
        let now = Utc::now().timestamp();
        self.issue(&Claims {
            sub: account_id.to_string(),
            kind: TokenKind::TwoFactor,
            iss: self.config.issuer().to_string(),
            iat: now,
            exp: now + self.config.temp_token_ttl_seconds(),
            email: None,
            name: None,
        })
    }

    /// Sign arbitrary claims.
    ///
    /// # Errors
    /// Returns an error if claims cannot be encoded or the key is rejected.
    pub fn issue(&self, claims: &Claims) -> Result<String, Error> {
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = HmacSha256::new_from_slice(self.key()).map_err(|_| Error::Key)?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, carries a bad signature
    /// or issuer, is expired, or is not of `expected` kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, Error> {
        self.verify_at(token, expected, Utc::now().timestamp())
    }

    pub(crate) fn verify_at(
        &self,
        token: &str,
        expected: TokenKind,
        now_unix_seconds: i64,
    ) -> Result<Claims, Error> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
        if parts.next().is_some() {
            return Err(Error::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
        let mut mac = HmacSha256::new_from_slice(self.key()).map_err(|_| Error::Key)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidSignature)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.iss != self.config.issuer() {
            return Err(Error::InvalidIssuer);
        }
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }
        if claims.kind != expected {
            return Err(Error::WrongKind);
        }

        Ok(claims)
    }

    fn key(&self) -> &[u8] {
        self.config.token_secret().expose_secret().as_bytes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn signer() -> TokenSigner {
        let config = AuthConfig::new(
            "https://api.medstock.test",
            SecretString::from("unit-test-signing-secret".to_string()),
        );
        TokenSigner::new(Arc::new(config))
    }

    fn account() -> Account {
        Account::new(
            "a@x.com".to_string(),
            "$argon2id$stub".to_string(),
            "Alice".to_string(),
        )
    }

    #[test]
    fn session_token_round_trips() {
        let signer = signer();
        let account = account();
        let token = signer.issue_session(&account).unwrap();
        let claims = signer.verify(&token, TokenKind::Session).unwrap();
        assert_eq!(claims.sub, account.id.to_string());
        assert_eq!(claims.email.as_deref(), Some("a@x.com"));
        assert_eq!(claims.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn kinds_are_never_interchangeable() {
        let signer = signer();
        let account = account();

        let temp = signer.issue_two_factor(account.id).unwrap();
        assert!(matches!(
            signer.verify(&temp, TokenKind::Session),
            Err(Error::WrongKind)
        ));

        let session = signer.issue_session(&account).unwrap();
        assert!(matches!(
            signer.verify(&session, TokenKind::TwoFactor),
            Err(Error::WrongKind)
        ));
    }

    #[test]
    fn tampered_claims_fail_signature() {
        let signer = signer();
        let token = signer.issue_session(&account()).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = Base64UrlUnpadded::encode_string(br#"{"sub":"evil"}"#);
        parts[1] = &forged;
        let forged_token = parts.join(".");
        assert!(matches!(
            signer.verify(&forged_token, TokenKind::Session),
            Err(Error::InvalidSignature) | Err(Error::Json(_))
        ));
    }

    #[test]
    fn expired_token_rejected() {
        let signer = signer();
        let token = signer.issue_session(&account()).unwrap();
        let far_future = Utc::now().timestamp() + 48 * 60 * 60;
        assert!(matches!(
            signer.verify_at(&token, TokenKind::Session, far_future),
            Err(Error::Expired)
        ));
    }

    #[test]
    fn malformed_tokens_rejected() {
        let signer = signer();
        assert!(matches!(
            signer.verify("not-a-token", TokenKind::Session),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            signer.verify("a.b.c.d", TokenKind::Session),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            signer.verify("!!.@@.##", TokenKind::Session),
            Err(Error::Base64)
        ));
    }

    #[test]
    fn issuer_mismatch_rejected() {
        let signer = signer();
        let other = TokenSigner::new(Arc::new(AuthConfig::new(
            "https://other.test",
            SecretString::from("unit-test-signing-secret".to_string()),
        )));
        let token = other.issue_session(&account()).unwrap();
        assert!(matches!(
            signer.verify(&token, TokenKind::Session),
            Err(Error::InvalidIssuer)
        ));
    }
}
