//! Auth orchestrator: the login state machine and account-credential
//! management flows.
//!
//! Every flow here is request-scoped; the only state lives behind the
//! repository traits. Enumeration resistance is a hard rule: unknown
//! email, inactive account, federation-only account and hash mismatch all
//! collapse into `InvalidCredentials`, every second-factor failure into
//! `InvalidTwoFactorCode`, and ownership violations into `NotFound`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::email::{Mailer, TEMPLATE_WELCOME};
use crate::email_otp::{EmailOtpManager, IssuedOtp};
use crate::error::AuthError;
use crate::federated::IdentityProvider;
use crate::guard::{AuthContext, AuthMethod};
use crate::hasher::CredentialHasher;
use crate::models::{Account, ApiKeyRecord, ClientCredentialRecord, SecondFactorKind};
use crate::store::{AccountStore, ApiKeyStore, ClientCredentialStore};
use crate::token::{self, TokenKind, TokenSigner};
use crate::totp::{self, Enrollment, TotpEngine};
use crate::{api_key::ApiKeyScheme, client_credential::ClientCredentialScheme};

const PURPOSE_TWO_FACTOR_LOGIN: &str = "two_factor_login";

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap_or_else(|_| unreachable!())
    })
}

/// Outcome of a primary-credential login.
#[derive(Debug)]
pub enum LoginOutcome {
    /// No second factor configured; the caller is fully authenticated.
    Session { token: String },
    /// Primary credential accepted, second factor pending. The temporary
    /// token is only good for the second-factor step.
    TwoFactorRequired {
        temp_token: String,
        preferred_method: Option<SecondFactorKind>,
    },
}

/// Result of a successful registration.
#[derive(Debug)]
pub struct Registration {
    pub account: Account,
    pub session_token: String,
}

/// Issued API key: the record plus the full key, shown exactly once.
#[derive(Debug)]
pub struct CreatedApiKey {
    pub record: ApiKeyRecord,
    pub full_key: String,
}

/// Issued client-credential pair: the record plus the secret, shown
/// exactly once.
#[derive(Debug)]
pub struct CreatedClientCredential {
    pub record: ClientCredentialRecord,
    pub client_secret: String,
}

pub struct AuthService {
    config: Arc<AuthConfig>,
    accounts: Arc<dyn AccountStore>,
    api_keys: Arc<dyn ApiKeyStore>,
    client_credentials: Arc<dyn ClientCredentialStore>,
    signer: TokenSigner,
    hasher: CredentialHasher,
    totp: TotpEngine,
    email_otp: EmailOtpManager,
    api_key_scheme: ApiKeyScheme,
    client_credential_scheme: ClientCredentialScheme,
    mailer: Arc<dyn Mailer>,
    identity: Arc<dyn IdentityProvider>,
}

impl AuthService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AuthConfig>,
        accounts: Arc<dyn AccountStore>,
        api_keys: Arc<dyn ApiKeyStore>,
        client_credentials: Arc<dyn ClientCredentialStore>,
        email_otp: EmailOtpManager,
        mailer: Arc<dyn Mailer>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let hasher = CredentialHasher::default();
        Self {
            signer: TokenSigner::new(config.clone()),
            totp: TotpEngine::new(config.app_name()),
            api_key_scheme: ApiKeyScheme::new(hasher.clone()),
            client_credential_scheme: ClientCredentialScheme::new(hasher.clone()),
            config,
            accounts,
            api_keys,
            client_credentials,
            hasher,
            email_otp,
            mailer,
            identity,
        }
    }

    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    #[must_use]
    pub fn api_key_scheme(&self) -> &ApiKeyScheme {
        &self.api_key_scheme
    }

    // ---- registration and primary login ----

    /// Create a local account and immediately open a session.
    ///
    /// The welcome email is detached: a delivery failure is logged and
    /// never fails the registration.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidEmail`] for malformed addresses and
    /// [`AuthError::DuplicateAccount`] when the email is taken.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Registration, AuthError> {
        let email = normalize_email(email)?;
        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(AuthError::DuplicateAccount);
        }

        let password_hash = self.hasher.hash(password)?;
        let account = Account::new(email, password_hash, display_name.trim().to_string());
        if let Err(err) = self.accounts.create(account.clone()).await {
            // A concurrent registration can win between the pre-check and
            // the insert; re-read to tell the unique violation apart from a
            // storage fault.
            if self.accounts.find_by_email(&account.email).await?.is_some() {
                return Err(AuthError::DuplicateAccount);
            }
            return Err(AuthError::Storage(err));
        }
        info!(account_id = %account.id, "account registered");

        self.spawn_welcome_email(&account);

        let session_token = self.signer.issue_session(&account).map_err(internal)?;
        Ok(Registration {
            account,
            session_token,
        })
    }

    /// Verify the primary credential. Opens a session directly, or returns
    /// a temporary token when a second factor is enabled.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidCredentials`] for every failure mode.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let account = self
            .accounts
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !account.active {
            return Err(AuthError::InvalidCredentials);
        }
        let Some(hash) = account.password_hash.as_deref() else {
            // Federation-only account; indistinguishable from a bad password.
            return Err(AuthError::InvalidCredentials);
        };
        if !self.hasher.verify(password, hash) {
            return Err(AuthError::InvalidCredentials);
        }

        if account.two_factor_enabled {
            let temp_token = self.signer.issue_two_factor(account.id).map_err(internal)?;
            return Ok(LoginOutcome::TwoFactorRequired {
                temp_token,
                preferred_method: account.preferred_method,
            });
        }

        let token = self.open_session(account).await?;
        Ok(LoginOutcome::Session { token })
    }

    /// Complete a pending two-factor login. The temporary token and the
    /// presented code are verified together; any failure yields the same
    /// error.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidTwoFactorCode`] for every failure mode.
    pub async fn login_with_second_factor(
        &self,
        temp_token: &str,
        code: &str,
        kind: SecondFactorKind,
    ) -> Result<String, AuthError> {
        let account_id = self.two_factor_subject(temp_token)?;
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::InvalidTwoFactorCode)?;
        if !account.active || !account.two_factor_enabled {
            return Err(AuthError::InvalidTwoFactorCode);
        }

        let verified = match kind {
            SecondFactorKind::Totp => account
                .two_factor_secret
                .as_deref()
                .is_some_and(|secret| self.totp.verify_code(code, secret)),
            SecondFactorKind::BackupCode => {
                // Atomic set-remove; a concurrent replay loses the race.
                self.accounts
                    .remove_backup_code(account.id, &totp::hash_backup_code(code))
                    .await?
            }
            SecondFactorKind::EmailOtp => self.email_otp.verify(account.id, code).await?,
        };
        if !verified {
            warn!(account_id = %account.id, kind = kind.as_str(), "second factor rejected");
            return Err(AuthError::InvalidTwoFactorCode);
        }

        // Re-read: the backup-code branch just mutated the account.
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::InvalidTwoFactorCode)?;
        self.open_session(account).await
    }

    /// Email a one-time login code to the account behind a pending
    /// two-factor login.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] for a bad temporary token and
    /// propagates [`AuthError::OtpDelivery`] from the mailer.
    pub async fn request_email_code(&self, temp_token: &str) -> Result<IssuedOtp, AuthError> {
        let account_id = self
            .signer
            .verify(temp_token, TokenKind::TwoFactor)
            .ok()
            .and_then(|claims| Uuid::parse_str(&claims.sub).ok())
            .ok_or(AuthError::InvalidToken)?;
        self.email_otp
            .issue(account_id, PURPOSE_TWO_FACTOR_LOGIN)
            .await
    }

    // ---- second-factor lifecycle ----

    /// Start TOTP enrollment. Nothing is persisted; the caller must confirm
    /// with a valid code before the factor becomes active.
    ///
    /// # Errors
    /// Returns [`AuthError::AlreadyEnabled`] when a factor is active and
    /// [`AuthError::InvalidCredentials`] when the password re-check fails.
    pub async fn enable_second_factor(
        &self,
        account_id: Uuid,
        password: &str,
    ) -> Result<Enrollment, AuthError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if account.two_factor_enabled {
            return Err(AuthError::AlreadyEnabled);
        }
        self.recheck_password(&account, password)?;
        let enrollment = self.totp.generate_enrollment(&account.email)?;
        Ok(enrollment)
    }

    /// Activate TOTP after the user proves possession of the secret.
    /// Persists the secret, enables the factor, and returns the plaintext
    /// backup codes. This is the only time they are visible.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidTwoFactorCode`] when the code does not
    /// match the pending secret; nothing is persisted in that case.
    pub async fn confirm_second_factor_setup(
        &self,
        account_id: Uuid,
        secret_base32: &str,
        code: &str,
    ) -> Result<Vec<String>, AuthError> {
        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if account.two_factor_enabled {
            return Err(AuthError::AlreadyEnabled);
        }
        if !self.totp.verify_code(code, secret_base32) {
            return Err(AuthError::InvalidTwoFactorCode);
        }

        let backup_codes = self
            .totp
            .generate_backup_codes(self.config.backup_code_count())?;
        account.two_factor_secret = Some(secret_base32.to_string());
        account.backup_code_hashes = totp::hash_backup_codes(&backup_codes);
        account.two_factor_enabled = true;
        account.preferred_method = Some(SecondFactorKind::Totp);
        self.accounts.update(&account).await?;
        info!(account_id = %account.id, "two-factor authentication enabled");
        Ok(backup_codes)
    }

    /// Turn the second factor off. Requires the password and, when a code
    /// is supplied, a valid TOTP or backup code as well.
    ///
    /// # Errors
    /// Returns [`AuthError::NotEnabled`] when no factor is active.
    pub async fn disable_second_factor(
        &self,
        account_id: Uuid,
        password: &str,
        code: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if !account.two_factor_enabled {
            return Err(AuthError::NotEnabled);
        }
        self.recheck_password(&account, password)?;

        if let Some(code) = code {
            let totp_ok = account
                .two_factor_secret
                .as_deref()
                .is_some_and(|secret| self.totp.verify_code(code, secret));
            let backup_ok = totp::verify_backup_code(code, &account.backup_code_hashes);
            if !totp_ok && !backup_ok {
                return Err(AuthError::InvalidTwoFactorCode);
            }
        }

        account.two_factor_enabled = false;
        account.two_factor_secret = None;
        account.backup_code_hashes.clear();
        account.preferred_method = None;
        self.accounts.update(&account).await?;
        info!(account_id = %account.id, "two-factor authentication disabled");
        Ok(())
    }

    // ---- API keys ----

    /// Issue a new API key for an account. The full key appears only in
    /// the result.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown accounts.
    pub async fn create_api_key(
        &self,
        account_id: Uuid,
        label: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreatedApiKey, AuthError> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        let issued = self.api_key_scheme.generate()?;
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            account_id,
            label: label.trim().to_string(),
            key_hash: issued.hash,
            prefix: issued.prefix,
            expires_at,
            active: true,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.api_keys.create(record.clone()).await?;
        info!(account_id = %account_id, key_id = %record.id, "api key issued");
        Ok(CreatedApiKey {
            record,
            full_key: issued.full_key,
        })
    }

    /// # Errors
    /// Propagates storage failures only.
    pub async fn list_api_keys(&self, account_id: Uuid) -> Result<Vec<ApiKeyRecord>, AuthError> {
        Ok(self.api_keys.list_by_account(account_id).await?)
    }

    /// Revoke a key the account owns. A key owned by someone else is
    /// reported as missing, not forbidden.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown or foreign keys.
    pub async fn revoke_api_key(&self, account_id: Uuid, key_id: Uuid) -> Result<(), AuthError> {
        let record = self
            .api_keys
            .find_by_id(key_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if record.account_id != account_id {
            return Err(AuthError::NotFound);
        }
        self.api_keys.revoke(key_id).await?;
        info!(account_id = %account_id, key_id = %key_id, "api key revoked");
        Ok(())
    }

    // ---- client credentials ----

    /// Issue a client-credential pair. The secret appears only in the
    /// result.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown accounts.
    pub async fn create_client_credential(
        &self,
        account_id: Uuid,
        label: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreatedClientCredential, AuthError> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        let issued = self.client_credential_scheme.generate()?;
        let record = ClientCredentialRecord {
            id: Uuid::new_v4(),
            account_id,
            label: label.trim().to_string(),
            client_id: issued.client_id,
            secret_hash: issued.secret_hash,
            expires_at,
            active: true,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.client_credentials.create(record.clone()).await?;
        info!(account_id = %account_id, credential_id = %record.id, "client credential issued");
        Ok(CreatedClientCredential {
            record,
            client_secret: issued.client_secret,
        })
    }

    /// # Errors
    /// Propagates storage failures only.
    pub async fn list_client_credentials(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ClientCredentialRecord>, AuthError> {
        Ok(self.client_credentials.list_by_account(account_id).await?)
    }

    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown or foreign credentials.
    pub async fn revoke_client_credential(
        &self,
        account_id: Uuid,
        credential_id: Uuid,
    ) -> Result<(), AuthError> {
        let record = self
            .client_credentials
            .find_by_id(credential_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if record.account_id != account_id {
            return Err(AuthError::NotFound);
        }
        self.client_credentials.revoke(credential_id).await?;
        info!(account_id = %account_id, credential_id = %credential_id, "client credential revoked");
        Ok(())
    }

    /// Authenticate a machine caller by client id and secret, returning
    /// an [`AuthContext`] for the owning account. Touches `last_used_at`
    /// on success.
    ///
    /// # Errors
    /// Returns [`AuthError::ExpiredCredential`] for an expired pair and
    /// [`AuthError::InvalidCredentials`] for every other failure mode.
    pub async fn validate_client_credential(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AuthContext, AuthError> {
        let record = self
            .client_credentials
            .find_by_client_id(client_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !record.active {
            return Err(AuthError::InvalidCredentials);
        }
        if crate::client_credential::is_expired(record.expires_at, Utc::now()) {
            return Err(AuthError::ExpiredCredential);
        }
        if !self
            .client_credential_scheme
            .verify(client_secret, &record.secret_hash)
        {
            return Err(AuthError::InvalidCredentials);
        }
        let account = self
            .accounts
            .find_by_id(record.account_id)
            .await?
            .filter(|account| account.active)
            .ok_or(AuthError::InvalidCredentials)?;
        self.client_credentials
            .touch_last_used(record.id, Utc::now())
            .await?;
        Ok(AuthContext {
            account,
            method: AuthMethod::ClientCredential,
            api_key: None,
        })
    }

    // ---- federated login ----

    /// Log in with a third-party identity token: look the account up by
    /// provider subject, fall back to linking by email, else create a new
    /// federation-only account. Honors the account's second-factor setting
    /// exactly like a password login.
    ///
    /// # Errors
    /// Returns [`AuthError::IdentityVerificationFailed`] when the provider
    /// rejects the token and [`AuthError::InvalidCredentials`] for an
    /// inactive account.
    pub async fn federated_login(&self, identity_token: &str) -> Result<LoginOutcome, AuthError> {
        let claims = self.identity.verify_identity_token(identity_token).await?;
        let email = normalize_email(&claims.email)
            .map_err(|_| AuthError::IdentityVerificationFailed)?;

        let account = match self.accounts.find_by_subject(&claims.subject).await? {
            Some(account) => account,
            None => match self.accounts.find_by_email(&email).await? {
                Some(mut account) => {
                    account.federated_subject = Some(claims.subject.clone());
                    self.accounts.update(&account).await?;
                    info!(account_id = %account.id, "linked federated identity to existing account");
                    account
                }
                None => {
                    let display_name = claims
                        .display_name
                        .clone()
                        .unwrap_or_else(|| email.clone());
                    let account =
                        Account::from_federated(claims.subject.clone(), email, display_name);
                    self.accounts.create(account.clone()).await?;
                    info!(account_id = %account.id, "account created from federated identity");
                    self.spawn_welcome_email(&account);
                    account
                }
            },
        };

        if !account.active {
            return Err(AuthError::InvalidCredentials);
        }
        if account.two_factor_enabled {
            let temp_token = self.signer.issue_two_factor(account.id).map_err(internal)?;
            return Ok(LoginOutcome::TwoFactorRequired {
                temp_token,
                preferred_method: account.preferred_method,
            });
        }
        let token = self.open_session(account).await?;
        Ok(LoginOutcome::Session { token })
    }

    // ---- profile ----

    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown accounts.
    pub async fn get_profile(&self, account_id: Uuid) -> Result<Account, AuthError> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)
    }

    /// Partial profile update; `None` fields are left untouched.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown accounts.
    pub async fn update_profile(
        &self,
        account_id: Uuid,
        display_name: Option<&str>,
        preferred_method: Option<SecondFactorKind>,
    ) -> Result<Account, AuthError> {
        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if let Some(name) = display_name {
            account.display_name = name.trim().to_string();
        }
        if let Some(method) = preferred_method {
            account.preferred_method = Some(method);
        }
        self.accounts.update(&account).await?;
        Ok(account)
    }

    /// # Errors
    /// Returns [`AuthError::InvalidCredentials`] when the current password
    /// does not match (or the account has no password to change).
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        self.recheck_password(&account, current_password)?;
        account.password_hash = Some(self.hasher.hash(new_password)?);
        self.accounts.update(&account).await?;
        info!(account_id = %account_id, "password changed");
        Ok(())
    }

    /// Flip the account inactive. Existing session tokens keep verifying
    /// cryptographically, but every login path and the guard refuse
    /// inactive accounts.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown accounts.
    pub async fn deactivate_account(&self, account_id: Uuid) -> Result<(), AuthError> {
        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        account.active = false;
        self.accounts.update(&account).await?;
        info!(account_id = %account_id, "account deactivated");
        Ok(())
    }

    // ---- internals ----

    async fn open_session(&self, mut account: Account) -> Result<String, AuthError> {
        account.last_login_at = Some(Utc::now());
        self.accounts.update(&account).await?;
        let token = self.signer.issue_session(&account).map_err(internal)?;
        info!(account_id = %account.id, "session opened");
        Ok(token)
    }

    fn two_factor_subject(&self, temp_token: &str) -> Result<Uuid, AuthError> {
        let claims = self
            .signer
            .verify(temp_token, TokenKind::TwoFactor)
            .map_err(|_| AuthError::InvalidTwoFactorCode)?;
        Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidTwoFactorCode)
    }

    fn recheck_password(&self, account: &Account, password: &str) -> Result<(), AuthError> {
        let verified = account
            .password_hash
            .as_deref()
            .is_some_and(|hash| self.hasher.verify(password, hash));
        if verified {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    fn spawn_welcome_email(&self, account: &Account) {
        let mailer = self.mailer.clone();
        let to = account.email.clone();
        let payload = json!({
            "app": self.config.app_name(),
            "name": account.display_name,
        });
        tokio::spawn(async move {
            if let Err(err) = mailer.send_templated(&to, TEMPLATE_WELCOME, payload).await {
                warn!("welcome email delivery failed: {err}");
            }
        });
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let normalized = email.trim().to_ascii_lowercase();
    if email_pattern().is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(AuthError::InvalidEmail)
    }
}

fn internal(err: token::Error) -> AuthError {
    AuthError::Storage(anyhow::Error::new(err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::email::NoopMailer;
    use crate::federated::IdentityClaims;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Simulates a registration that loses the unique-constraint race: the
    /// pre-check sees no account, the insert fails, and a re-read finds the
    /// winner.
    #[derive(Default)]
    struct RacingAccountStore {
        raced: AtomicBool,
    }

    #[async_trait]
    impl AccountStore for RacingAccountStore {
        async fn find_by_id(&self, _id: Uuid) -> anyhow::Result<Option<Account>> {
            Ok(None)
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>> {
            if self.raced.load(Ordering::SeqCst) {
                Ok(Some(Account::new(
                    email.to_string(),
                    "$argon2id$stub".to_string(),
                    "First".to_string(),
                )))
            } else {
                Ok(None)
            }
        }

        async fn find_by_subject(&self, _subject: &str) -> anyhow::Result<Option<Account>> {
            Ok(None)
        }

        async fn create(&self, _account: Account) -> anyhow::Result<()> {
            self.raced.store(true, Ordering::SeqCst);
            Err(anyhow::anyhow!("unique violation: accounts.email"))
        }

        async fn update(&self, _account: &Account) -> anyhow::Result<()> {
            Ok(())
        }

        async fn remove_backup_code(
            &self,
            _account_id: Uuid,
            _digest: &str,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct RejectingIdentityProvider;

    #[async_trait]
    impl IdentityProvider for RejectingIdentityProvider {
        async fn verify_identity_token(
            &self,
            _token: &str,
        ) -> Result<IdentityClaims, AuthError> {
            Err(AuthError::IdentityVerificationFailed)
        }
    }

    fn service_with_accounts(accounts: Arc<dyn AccountStore>) -> AuthService {
        let config = Arc::new(AuthConfig::new(
            "https://api.test",
            SecretString::from("unit-test-signing-secret".to_string()),
        ));
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(NoopMailer);
        let email_otp = EmailOtpManager::new(
            config.clone(),
            accounts.clone(),
            store.clone(),
            mailer.clone(),
        );
        AuthService::new(
            config,
            accounts,
            store.clone(),
            store,
            email_otp,
            mailer,
            Arc::new(RejectingIdentityProvider),
        )
    }

    #[tokio::test]
    async fn losing_the_registration_race_reads_as_duplicate() {
        let service = service_with_accounts(Arc::new(RacingAccountStore::default()));
        let err = service
            .register("nurse@ward.test", "a strong passphrase", "Nurse Joy")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateAccount));
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(
            normalize_email("  Nurse@Ward.Test ").unwrap(),
            "nurse@ward.test"
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "no-at-sign", "two@@x.com ok", "a@b", "spaces in@x.com"] {
            assert!(
                matches!(normalize_email(bad), Err(AuthError::InvalidEmail)),
                "accepted: {bad}"
            );
        }
    }
}
