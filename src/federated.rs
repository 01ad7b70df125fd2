//! Federated identity provider boundary.
//!
//! The provider's token-verification service is an external collaborator;
//! this module only adapts its result shape. A provider outage surfaces as
//! a verification failure for that request, never retried here.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::AuthError;

/// Claims extracted from a verified identity token.
#[derive(Clone, Debug)]
pub struct IdentityClaims {
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a third-party identity token and return its claims.
    ///
    /// # Errors
    /// Returns [`AuthError::IdentityVerificationFailed`] for invalid tokens
    /// and provider transport failures alike.
    async fn verify_identity_token(&self, token: &str) -> Result<IdentityClaims, AuthError>;
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    sub: String,
    email: String,
    name: Option<String>,
    picture: Option<String>,
}

/// Adapter for providers exposing an HTTP token-verification endpoint
/// (e.g. an OIDC `tokeninfo` endpoint).
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpIdentityProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, verify_url: impl Into<String>) -> Self {
        Self {
            client,
            verify_url: verify_url.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_identity_token(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let response = self
            .client
            .get(&self.verify_url)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|err| {
                warn!("identity provider unreachable: {err}");
                AuthError::IdentityVerificationFailed
            })?;

        let response = response.error_for_status().map_err(|err| {
            warn!("identity provider rejected token: {err}");
            AuthError::IdentityVerificationFailed
        })?;

        let claims: ProviderResponse = response.json().await.map_err(|err| {
            warn!("identity provider returned malformed claims: {err}");
            AuthError::IdentityVerificationFailed
        })?;

        Ok(IdentityClaims {
            subject: claims.sub,
            email: claims.email,
            display_name: claims.name,
            picture_url: claims.picture,
        })
    }
}
