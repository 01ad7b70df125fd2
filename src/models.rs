//! Persisted entities owned by the auth core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Second-factor mechanisms a client can present during login.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondFactorKind {
    Totp,
    BackupCode,
    EmailOtp,
}

impl SecondFactorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
            Self::EmailOtp => "email_otp",
        }
    }
}

/// Identity record. Never hard-deleted by this subsystem; deactivation is a
/// flag flip.
///
/// Invariant: when `two_factor_enabled` is set, `two_factor_secret` is
/// present and `backup_code_hashes` was non-empty at enablement time (the
/// codes may deplete afterwards).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    /// Absent for federation-only accounts.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub display_name: String,
    pub active: bool,
    /// Subject id at the federated identity provider, unique when present.
    pub federated_subject: Option<String>,
    pub two_factor_enabled: bool,
    #[serde(skip_serializing, default)]
    pub two_factor_secret: Option<String>,
    #[serde(skip_serializing, default)]
    pub backup_code_hashes: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub preferred_method: Option<SecondFactorKind>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Fresh local account with a password hash.
    #[must_use]
    pub fn new(email: String, password_hash: String, display_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: Some(password_hash),
            display_name,
            active: true,
            federated_subject: None,
            two_factor_enabled: false,
            two_factor_secret: None,
            backup_code_hashes: Vec::new(),
            last_login_at: None,
            preferred_method: None,
            created_at: Utc::now(),
        }
    }

    /// Fresh account created from a federated identity; no local password.
    #[must_use]
    pub fn from_federated(subject: String, email: String, display_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: None,
            display_name,
            active: true,
            federated_subject: Some(subject),
            two_factor_enabled: false,
            two_factor_secret: None,
            backup_code_hashes: Vec::new(),
            last_login_at: None,
            preferred_method: None,
            created_at: Utc::now(),
        }
    }
}

/// Stored API key. The full key is returned exactly once at issuance; only
/// its hash and a short lookup prefix persist.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub label: String,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    /// Fixed-length leading substring of the issued key, stored unhashed as
    /// a lookup index. Unique per active key.
    pub prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Stored client-credential pair for machine-to-machine calls. Same
/// secret-never-stored invariant as [`ApiKeyRecord`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientCredentialRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub label: String,
    pub client_id: String,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Stored emailed one-time code. Consumable exactly once; TOTP and backup
/// codes are never stored as tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailOtpRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub code: String,
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}
