//! In-memory store for tests and embedded use.
//!
//! A single mutex guards all tables, so the conditional updates required by
//! the repository contracts are trivially atomic here.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountStore, ApiKeyStore, ClientCredentialStore, SecondFactorTokenStore};
use crate::models::{Account, ApiKeyRecord, ClientCredentialRecord, EmailOtpRecord};

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    api_keys: HashMap<Uuid, ApiKeyRecord>,
    client_credentials: HashMap<Uuid, ClientCredentialRecord>,
    otp_tokens: Vec<EmailOtpRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.federated_subject.as_deref() == Some(subject))
            .cloned())
    }

    async fn create(&self, account: Account) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .accounts
            .values()
            .any(|existing| existing.email == account.email)
        {
            return Err(anyhow!("unique violation: accounts.email"));
        }
        tables.accounts.insert(account.id, account);
        Ok(())
    }

    async fn update(&self, account: &Account) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(anyhow!("account not found")),
        }
    }

    async fn remove_backup_code(&self, account_id: Uuid, digest: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(account) = tables.accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        let Some(position) = account
            .backup_code_hashes
            .iter()
            .position(|stored| stored == digest)
        else {
            return Ok(false);
        };
        account.backup_code_hashes.remove(position);
        Ok(true)
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn create(&self, key: ApiKeyRecord) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .api_keys
            .values()
            .any(|existing| existing.prefix == key.prefix)
        {
            return Err(anyhow!("unique violation: api_keys.prefix"));
        }
        tables.api_keys.insert(key.id, key);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord>> {
        Ok(self.tables.lock().await.api_keys.get(&id).cloned())
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .api_keys
            .values()
            .find(|key| key.prefix == prefix)
            .cloned())
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<ApiKeyRecord>> {
        let tables = self.tables.lock().await;
        let mut keys: Vec<ApiKeyRecord> = tables
            .api_keys
            .values()
            .filter(|key| key.account_id == account_id)
            .cloned()
            .collect();
        keys.sort_by_key(|key| key.created_at);
        Ok(keys)
    }

    async fn touch_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<()> {
        if let Some(key) = self.tables.lock().await.api_keys.get_mut(&id) {
            key.last_used_at = Some(when);
        }
        Ok(())
    }

    async fn revoke(&self, id: Uuid) -> Result<()> {
        if let Some(key) = self.tables.lock().await.api_keys.get_mut(&id) {
            key.active = false;
        }
        Ok(())
    }
}

#[async_trait]
impl ClientCredentialStore for MemoryStore {
    async fn create(&self, credential: ClientCredentialRecord) -> Result<()> {
        self.tables
            .lock()
            .await
            .client_credentials
            .insert(credential.id, credential);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClientCredentialRecord>> {
        Ok(self.tables.lock().await.client_credentials.get(&id).cloned())
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ClientCredentialRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .client_credentials
            .values()
            .find(|credential| credential.client_id == client_id)
            .cloned())
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<ClientCredentialRecord>> {
        let tables = self.tables.lock().await;
        let mut credentials: Vec<ClientCredentialRecord> = tables
            .client_credentials
            .values()
            .filter(|credential| credential.account_id == account_id)
            .cloned()
            .collect();
        credentials.sort_by_key(|credential| credential.created_at);
        Ok(credentials)
    }

    async fn touch_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<()> {
        if let Some(credential) = self.tables.lock().await.client_credentials.get_mut(&id) {
            credential.last_used_at = Some(when);
        }
        Ok(())
    }

    async fn revoke(&self, id: Uuid) -> Result<()> {
        if let Some(credential) = self.tables.lock().await.client_credentials.get_mut(&id) {
            credential.active = false;
        }
        Ok(())
    }
}

#[async_trait]
impl SecondFactorTokenStore for MemoryStore {
    async fn create(&self, token: EmailOtpRecord) -> Result<()> {
        self.tables.lock().await.otp_tokens.push(token);
        Ok(())
    }

    async fn consume(&self, account_id: Uuid, code: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(token) = tables.otp_tokens.iter_mut().find(|token| {
            token.account_id == account_id
                && token.code == code
                && !token.used
                && token.expires_at > now
        }) else {
            return Ok(false);
        };
        token.used = true;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(email: &str) -> Account {
        Account::new(
            email.to_string(),
            "$argon2id$stub".to_string(),
            "Test".to_string(),
        )
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let store = MemoryStore::new();
        AccountStore::create(&store, account("a@x.com")).await.unwrap();
        assert!(AccountStore::create(&store, account("a@x.com")).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_api_key_prefix_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let key = ApiKeyRecord {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            label: "scanner".to_string(),
            key_hash: "$argon2id$stub".to_string(),
            prefix: "msk_deadbeef".to_string(),
            expires_at: None,
            active: true,
            last_used_at: None,
            created_at: now,
        };
        ApiKeyStore::create(&store, key.clone()).await.unwrap();

        let colliding = ApiKeyRecord {
            id: Uuid::new_v4(),
            ..key
        };
        assert!(ApiKeyStore::create(&store, colliding).await.is_err());
    }

    #[tokio::test]
    async fn backup_code_removal_is_single_shot() {
        let store = MemoryStore::new();
        let mut acct = account("a@x.com");
        acct.backup_code_hashes = vec!["d1".to_string(), "d2".to_string()];
        let id = acct.id;
        AccountStore::create(&store, acct).await.unwrap();

        assert!(store.remove_backup_code(id, "d1").await.unwrap());
        assert!(!store.remove_backup_code(id, "d1").await.unwrap());
        assert!(store.remove_backup_code(id, "d2").await.unwrap());
    }

    #[tokio::test]
    async fn otp_consume_is_single_shot_and_expiry_aware() {
        let store = MemoryStore::new();
        let account_id = Uuid::new_v4();
        let now = Utc::now();
        SecondFactorTokenStore::create(
            &store,
            EmailOtpRecord {
                id: Uuid::new_v4(),
                account_id,
                code: "123456".to_string(),
                purpose: "two_factor_login".to_string(),
                expires_at: now + Duration::minutes(5),
                used: false,
                created_at: now,
            },
        )
        .await
        .unwrap();

        assert!(!store.consume(account_id, "999999", now).await.unwrap());
        assert!(store.consume(account_id, "123456", now).await.unwrap());
        assert!(!store.consume(account_id, "123456", now).await.unwrap());

        let expired_id = Uuid::new_v4();
        SecondFactorTokenStore::create(
            &store,
            EmailOtpRecord {
                id: Uuid::new_v4(),
                account_id: expired_id,
                code: "654321".to_string(),
                purpose: "two_factor_login".to_string(),
                expires_at: now - Duration::minutes(1),
                used: false,
                created_at: now - Duration::minutes(10),
            },
        )
        .await
        .unwrap();
        assert!(!store.consume(expired_id, "654321", now).await.unwrap());
    }
}
