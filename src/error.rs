//! Error taxonomy for the auth core.
//!
//! Display strings are deliberately generic: account-existence and
//! credential-mismatch failures all collapse into the same message so a
//! caller cannot probe which accounts or credentials exist. Controllers map
//! these variants to HTTP statuses; nothing here is fatal to the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email, inactive account, federation-only account, or hash
    /// mismatch. All four cases share this variant.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("an account with this email already exists")]
    DuplicateAccount,

    /// Guard-level denial. No distinction between missing and invalid
    /// credentials.
    #[error("authentication required")]
    Unauthenticated,

    /// Malformed, tampered, expired, or wrong-kind bearer token.
    #[error("invalid or expired token")]
    InvalidToken,

    /// Any second-factor verification failure, regardless of which check
    /// failed (TOTP, backup code, emailed code, or the temporary token).
    #[error("invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("identity verification failed")]
    IdentityVerificationFailed,

    /// Also returned for ownership violations instead of a forbidden
    /// variant, to prevent resource enumeration.
    #[error("not found")]
    NotFound,

    #[error("two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("two-factor authentication is not enabled")]
    NotEnabled,

    #[error("credential has expired")]
    ExpiredCredential,

    /// Emailed one-time codes are useless if undelivered, so dispatch
    /// failure is a hard failure for that flow only.
    #[error("one-time code could not be delivered")]
    OtpDelivery(#[source] anyhow::Error),

    #[error("storage failure")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::AuthError;

    #[test]
    fn messages_do_not_leak_internals() {
        let err = AuthError::Storage(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.to_string(), "storage failure");

        let err = AuthError::OtpDelivery(anyhow::anyhow!("smtp 550"));
        assert_eq!(err.to_string(), "one-time code could not be delivered");
    }

    #[test]
    fn credential_failures_share_one_message() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "invalid email or password"
        );
        assert_eq!(
            AuthError::InvalidTwoFactorCode.to_string(),
            "invalid two-factor code"
        );
    }
}
