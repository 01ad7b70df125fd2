//! Per-request authentication dispatch.
//!
//! The guard walks an ordered list of strategies and stops at the first
//! success: bearer session token, API key found in the Authorization
//! header, then API key in the dedicated `x-api-key` header. A strategy
//! that does not recognize the request yields `None` so the next one can
//! try; only storage failures propagate as errors. When nothing matches,
//! the caller gets a single `Unauthenticated` with no hint of whether
//! credentials were missing, malformed, or wrong.

use async_trait::async_trait;
use chrono::Utc;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::api_key::{self, ApiKeyScheme, KEY_PREFIX_LEN};
use crate::error::AuthError;
use crate::models::Account;
use crate::store::{AccountStore, ApiKeyStore};
use crate::token::{TokenKind, TokenSigner};

/// Dedicated API-key header, checked after the Authorization header.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthMethod {
    Token,
    ApiKey,
    ClientCredential,
}

/// Metadata about the API key that authenticated a request.
#[derive(Clone, Debug)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub label: String,
    pub prefix: String,
}

/// Resolved identity attached to a request after successful dispatch.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub account: Account,
    pub method: AuthMethod,
    pub api_key: Option<ApiKeyInfo>,
}

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// `Ok(None)` means "not mine / no match"; errors are reserved for
    /// storage failures.
    async fn try_authenticate(&self, headers: &HeaderMap)
        -> Result<Option<AuthContext>, AuthError>;
}

/// Session-token verification against the Authorization header.
pub struct BearerSessionStrategy {
    signer: TokenSigner,
    accounts: Arc<dyn AccountStore>,
}

impl BearerSessionStrategy {
    #[must_use]
    pub fn new(signer: TokenSigner, accounts: Arc<dyn AccountStore>) -> Self {
        Self { signer, accounts }
    }
}

#[async_trait]
impl AuthStrategy for BearerSessionStrategy {
    async fn try_authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<AuthContext>, AuthError> {
        let Some(token) = bearer_value(headers) else {
            return Ok(None);
        };
        // Tagged keys in a Bearer header belong to the API-key strategy.
        if token.starts_with(api_key::KEY_TAG) {
            return Ok(None);
        }
        let Ok(claims) = self.signer.verify(token, TokenKind::Session) else {
            return Ok(None);
        };
        let Ok(account_id) = Uuid::parse_str(&claims.sub) else {
            return Ok(None);
        };
        let Some(account) = self.accounts.find_by_id(account_id).await? else {
            return Ok(None);
        };
        if !account.active {
            debug!(account_id = %account_id, "bearer token for inactive account");
            return Ok(None);
        }
        Ok(Some(AuthContext {
            account,
            method: AuthMethod::Token,
            api_key: None,
        }))
    }
}

/// Which header an [`ApiKeyStrategy`] instance reads.
#[derive(Clone, Copy, Debug)]
pub enum ApiKeySource {
    Authorization,
    DedicatedHeader,
}

/// Opaque-key verification: extract, format-check, prefix lookup, expiry
/// and activity checks, then the slow hash comparison. Touches
/// `last_used_at` on every successful authentication.
pub struct ApiKeyStrategy {
    source: ApiKeySource,
    scheme: ApiKeyScheme,
    accounts: Arc<dyn AccountStore>,
    api_keys: Arc<dyn ApiKeyStore>,
}

impl ApiKeyStrategy {
    #[must_use]
    pub fn new(
        source: ApiKeySource,
        scheme: ApiKeyScheme,
        accounts: Arc<dyn AccountStore>,
        api_keys: Arc<dyn ApiKeyStore>,
    ) -> Self {
        Self {
            source,
            scheme,
            accounts,
            api_keys,
        }
    }

    fn candidate_key(&self, headers: &HeaderMap) -> Option<String> {
        let value = match self.source {
            ApiKeySource::Authorization => headers.get(AUTHORIZATION)?.to_str().ok()?,
            ApiKeySource::DedicatedHeader => headers.get(API_KEY_HEADER)?.to_str().ok()?,
        };
        api_key::extract_from_header(value)
    }
}

#[async_trait]
impl AuthStrategy for ApiKeyStrategy {
    async fn try_authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<AuthContext>, AuthError> {
        let Some(key) = self.candidate_key(headers) else {
            return Ok(None);
        };
        // Strict format gate before any storage lookup.
        if !api_key::is_valid_format(&key) {
            return Ok(None);
        }
        let prefix: String = key.chars().take(KEY_PREFIX_LEN).collect();
        let Some(record) = self.api_keys.find_by_prefix(&prefix).await? else {
            return Ok(None);
        };
        if !record.active || api_key::is_expired(record.expires_at, Utc::now()) {
            return Ok(None);
        }
        if !self.scheme.verify(&key, &record.key_hash) {
            return Ok(None);
        }
        let Some(account) = self.accounts.find_by_id(record.account_id).await? else {
            return Ok(None);
        };
        if !account.active {
            return Ok(None);
        }
        self.api_keys.touch_last_used(record.id, Utc::now()).await?;
        Ok(Some(AuthContext {
            account,
            method: AuthMethod::ApiKey,
            api_key: Some(ApiKeyInfo {
                id: record.id,
                label: record.label,
                prefix: record.prefix,
            }),
        }))
    }
}

pub struct AuthGuard {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthGuard {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn AuthStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard dispatch order: bearer session token, API key in the
    /// Authorization header, API key in the dedicated header.
    #[must_use]
    pub fn standard(
        signer: TokenSigner,
        scheme: ApiKeyScheme,
        accounts: Arc<dyn AccountStore>,
        api_keys: Arc<dyn ApiKeyStore>,
    ) -> Self {
        Self::new(vec![
            Box::new(BearerSessionStrategy::new(signer, accounts.clone())),
            Box::new(ApiKeyStrategy::new(
                ApiKeySource::Authorization,
                scheme.clone(),
                accounts.clone(),
                api_keys.clone(),
            )),
            Box::new(ApiKeyStrategy::new(
                ApiKeySource::DedicatedHeader,
                scheme,
                accounts,
                api_keys,
            )),
        ])
    }

    /// Resolve the request's identity, first strategy success wins.
    ///
    /// # Errors
    /// Returns [`AuthError::Unauthenticated`] when no strategy matches;
    /// storage failures propagate as [`AuthError::Storage`].
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        for strategy in &self.strategies {
            if let Some(context) = strategy.try_authenticate(headers).await? {
                return Ok(context);
            }
        }
        Err(AuthError::Unauthenticated)
    }
}

fn bearer_value(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn bearer_value_parses_common_shapes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_value(&headers), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_value(&headers), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_value(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_value(&headers), None);

        assert_eq!(bearer_value(&HeaderMap::new()), None);
    }
}
