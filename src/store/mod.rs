//! Repository interfaces for the relational store.
//!
//! The auth core is request-scoped and stateless; every storage operation
//! is the unit of atomicity. Two operations carry explicit atomicity
//! contracts so that concurrent requests cannot replay single-use codes:
//! [`SecondFactorTokenStore::consume`] and
//! [`AccountStore::remove_backup_code`]. Implementations must honor them
//! with a conditional update (or equivalent), not a read-modify-write.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Account, ApiKeyRecord, ClientCredentialRecord, EmailOtpRecord};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;
    async fn find_by_subject(&self, subject: &str) -> Result<Option<Account>>;
    /// Fails on a duplicate email, mirroring a unique constraint.
    async fn create(&self, account: Account) -> Result<()>;
    async fn update(&self, account: &Account) -> Result<()>;
    /// Atomically remove one backup-code digest from the account's set.
    /// Returns `false` when the digest was not present (already consumed by
    /// a concurrent request, or never issued).
    async fn remove_backup_code(&self, account_id: Uuid, digest: &str) -> Result<bool>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Fails on a duplicate prefix, mirroring a unique constraint: the
    /// prefix is the sole lookup index, so a collision would silently
    /// shadow an existing key.
    async fn create(&self, key: ApiKeyRecord) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord>>;
    /// Prefix lookup index; the caller still verifies the full-key hash.
    /// At most one record per prefix (enforced by `create`).
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyRecord>>;
    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<ApiKeyRecord>>;
    async fn touch_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<()>;
    /// Clears the active flag; records are never physically deleted.
    async fn revoke(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ClientCredentialStore: Send + Sync {
    async fn create(&self, credential: ClientCredentialRecord) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClientCredentialRecord>>;
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ClientCredentialRecord>>;
    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<ClientCredentialRecord>>;
    async fn touch_last_used(&self, id: Uuid, when: DateTime<Utc>) -> Result<()>;
    async fn revoke(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait SecondFactorTokenStore: Send + Sync {
    async fn create(&self, token: EmailOtpRecord) -> Result<()>;
    /// Atomically find an unused, unexpired token matching `(account_id,
    /// code)` and mark it used. Two concurrent calls with the same code
    /// must not both return `true`.
    async fn consume(&self, account_id: Uuid, code: &str, now: DateTime<Utc>) -> Result<bool>;
}
