//! Auth configuration, constructed once at process start and passed by
//! reference into each component. No ambient singletons.

use secrecy::SecretString;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_TEMP_TOKEN_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_EMAIL_OTP_TTL_MINUTES: i64 = 5;
const DEFAULT_BACKUP_CODE_COUNT: usize = 8;
const DEFAULT_APP_NAME: &str = "MedStock";

const ENV_TOKEN_SECRET: &str = "MEDSTOCK_TOKEN_SECRET";
const ENV_ISSUER: &str = "MEDSTOCK_TOKEN_ISSUER";
const ENV_SESSION_TTL: &str = "MEDSTOCK_SESSION_TTL_SECONDS";

#[derive(Debug)]
pub struct AuthConfig {
    app_name: String,
    issuer: String,
    token_secret: SecretString,
    session_ttl_seconds: i64,
    temp_token_ttl_seconds: i64,
    email_otp_ttl_minutes: i64,
    backup_code_count: usize,
}

impl AuthConfig {
    #[must_use]
    pub fn new(issuer: impl Into<String>, token_secret: SecretString) -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            issuer: issuer.into(),
            token_secret,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            temp_token_ttl_seconds: DEFAULT_TEMP_TOKEN_TTL_SECONDS,
            email_otp_ttl_minutes: DEFAULT_EMAIL_OTP_TTL_MINUTES,
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
        }
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for everything but the signing secret.
    ///
    /// # Errors
    /// Returns an error if the signing secret is not set.
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var(ENV_TOKEN_SECRET)
            .map_err(|_| anyhow::anyhow!("{ENV_TOKEN_SECRET} is not set"))?;
        let issuer =
            std::env::var(ENV_ISSUER).unwrap_or_else(|_| "https://api.medstock.dev".to_string());
        let mut config = Self::new(issuer, SecretString::from(secret));
        if let Some(ttl) = parse_i64_env(ENV_SESSION_TTL) {
            config.session_ttl_seconds = ttl;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_temp_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.temp_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_otp_ttl_minutes(mut self, minutes: i64) -> Self {
        self.email_otp_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn token_secret(&self) -> &SecretString {
        &self.token_secret
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn temp_token_ttl_seconds(&self) -> i64 {
        self.temp_token_ttl_seconds
    }

    #[must_use]
    pub fn email_otp_ttl_minutes(&self) -> i64 {
        self.email_otp_ttl_minutes
    }

    #[must_use]
    pub fn backup_code_count(&self) -> usize {
        self.backup_code_count
    }
}

fn parse_i64_env(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}
