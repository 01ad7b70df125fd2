//! Outbound email collaborator boundary.
//!
//! Delivery is owned by the host application. The auth core only hands over
//! a recipient, a template id, and a JSON payload; registration flows treat
//! dispatch failure as non-fatal, while emailed one-time codes treat it as
//! a hard failure (the code is useless if undelivered).

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub const TEMPLATE_WELCOME: &str = "welcome";
pub const TEMPLATE_LOGIN_CODE: &str = "login_code";

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_templated(
        &self,
        to: &str,
        template: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
}

/// Discards every message. Useful for tests and deployments that have not
/// wired a delivery backend yet.
#[derive(Debug, Default)]
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_templated(
        &self,
        to: &str,
        template: &str,
        _payload: serde_json::Value,
    ) -> Result<()> {
        debug!(%to, %template, "noop mailer discarding message");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{Mailer, NoopMailer, TEMPLATE_WELCOME};
    use serde_json::json;

    #[tokio::test]
    async fn noop_mailer_always_succeeds() {
        let mailer = NoopMailer;
        mailer
            .send_templated("a@x.com", TEMPLATE_WELCOME, json!({"name": "Alice"}))
            .await
            .unwrap();
    }
}
