//! Emailed one-time codes.
//!
//! Codes are short-lived 6-digit numerics, persisted through the token
//! store and dispatched through the mailer. The code itself never appears
//! in the issue result; callers only learn that a code is on its way and
//! when it expires. Consumption is a single atomic conditional update in
//! the store, so a code verified once can never verify again.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::email::{Mailer, TEMPLATE_LOGIN_CODE};
use crate::error::AuthError;
use crate::models::EmailOtpRecord;
use crate::store::{AccountStore, SecondFactorTokenStore};

const OTP_DIGITS: u32 = 6;

/// Issue result. Deliberately opaque: no code, just delivery metadata.
#[derive(Debug)]
pub struct IssuedOtp {
    pub expires_in_minutes: i64,
}

pub struct EmailOtpManager {
    config: Arc<AuthConfig>,
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<dyn SecondFactorTokenStore>,
    mailer: Arc<dyn Mailer>,
}

impl EmailOtpManager {
    #[must_use]
    pub fn new(
        config: Arc<AuthConfig>,
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<dyn SecondFactorTokenStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            accounts,
            tokens,
            mailer,
        }
    }

    /// Generate, persist, and dispatch a code bound to an account and
    /// purpose.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for unknown accounts and
    /// [`AuthError::OtpDelivery`] when the mailer fails; an undelivered
    /// code is useless, so dispatch failure is fatal for this flow.
    pub async fn issue(&self, account_id: Uuid, purpose: &str) -> Result<IssuedOtp, AuthError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        let code = generate_code().map_err(AuthError::Storage)?;
        let ttl_minutes = self.config.email_otp_ttl_minutes();
        let now = Utc::now();
        self.tokens
            .create(EmailOtpRecord {
                id: Uuid::new_v4(),
                account_id,
                code: code.clone(),
                purpose: purpose.to_string(),
                expires_at: now + Duration::minutes(ttl_minutes),
                used: false,
                created_at: now,
            })
            .await?;

        self.mailer
            .send_templated(
                &account.email,
                TEMPLATE_LOGIN_CODE,
                json!({
                    "app": self.config.app_name(),
                    "name": account.display_name,
                    "code": code,
                    "expires_in_minutes": ttl_minutes,
                }),
            )
            .await
            .map_err(AuthError::OtpDelivery)?;

        info!(account_id = %account_id, %purpose, "emailed one-time code issued");
        Ok(IssuedOtp {
            expires_in_minutes: ttl_minutes,
        })
    }

    /// Atomically consume an unused, unexpired code. Returns `false` on any
    /// mismatch; the caller decides how to coalesce that into its error.
    ///
    /// # Errors
    /// Returns an error only for storage failures.
    pub async fn verify(&self, account_id: Uuid, code: &str) -> Result<bool, AuthError> {
        let consumed = self
            .tokens
            .consume(account_id, code.trim(), Utc::now())
            .await?;
        Ok(consumed)
    }
}

fn generate_code() -> Result<String> {
    let mut bytes = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow!("rng failure: {e}"))?;
    let value = u32::from_be_bytes(bytes) % 10u32.pow(OTP_DIGITS);
    Ok(format!("{value:06}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::email::NoopMailer;
    use crate::models::Account;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use secrecy::SecretString;

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send_templated(
            &self,
            _to: &str,
            _template: &str,
            _payload: serde_json::Value,
        ) -> Result<()> {
            Err(anyhow!("smtp unavailable"))
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: tokio::sync::Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_templated(
            &self,
            _to: &str,
            _template: &str,
            payload: serde_json::Value,
        ) -> Result<()> {
            self.sent.lock().await.push(payload);
            Ok(())
        }
    }

    fn manager(mailer: Arc<dyn Mailer>) -> (EmailOtpManager, Arc<MemoryStore>, Account) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(AuthConfig::new(
            "https://api.test",
            SecretString::from("secret".to_string()),
        ));
        let account = Account::new(
            "nurse@ward.test".to_string(),
            "$argon2id$stub".to_string(),
            "Nurse Joy".to_string(),
        );
        let manager = EmailOtpManager::new(config, store.clone(), store.clone(), mailer);
        (manager, store, account)
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..32 {
            let code = generate_code().unwrap();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|ch| ch.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let (manager, _, _) = manager(Arc::new(NoopMailer));
        let result = manager.issue(Uuid::new_v4(), "two_factor_login").await;
        assert!(matches!(result, Err(AuthError::NotFound)));
    }

    #[tokio::test]
    async fn dispatch_failure_is_fatal_for_issuance() {
        let (manager, store, account) = manager(Arc::new(FailingMailer));
        AccountStore::create(store.as_ref(), account.clone())
            .await
            .unwrap();
        let result = manager.issue(account.id, "two_factor_login").await;
        assert!(matches!(result, Err(AuthError::OtpDelivery(_))));
    }

    #[tokio::test]
    async fn verify_consumes_exactly_once() {
        let mailer = Arc::new(RecordingMailer::default());
        let (manager, store, account) = manager(mailer.clone());
        AccountStore::create(store.as_ref(), account.clone())
            .await
            .unwrap();
        let issued = manager.issue(account.id, "two_factor_login").await.unwrap();
        assert_eq!(issued.expires_in_minutes, 5);

        let code = {
            let sent = mailer.sent.lock().await;
            sent[0]["code"].as_str().unwrap().to_string()
        };
        assert!(manager.verify(account.id, &code).await.unwrap());
        assert!(!manager.verify(account.id, &code).await.unwrap());
    }
}
