//! Authentication core for the MedStock inventory backend.
//!
//! Covers the full credential lifecycle for hospital staff and machine
//! callers: Argon2id password hashing, signed session and temporary login
//! tokens, TOTP with backup codes, emailed one-time codes, opaque API keys
//! with prefix lookup, client-credential pairs, and federated login. The
//! [`service::AuthService`] orchestrator drives the login state machine;
//! the [`guard::AuthGuard`] resolves per-request identity from headers.
//!
//! Security boundaries:
//! - Secrets are stored hashed only; full keys and plaintext backup codes
//!   appear exactly once, in the issuance result.
//! - Error messages never reveal whether an account or credential exists.
//! - Single-use codes are consumed through atomic store operations, so
//!   concurrent replays cannot both succeed.
//!
//! Storage, email delivery, and identity-provider verification are
//! collaborator traits owned by the host application; an in-memory store
//! and a no-op mailer ship for tests and embedding.

pub mod api_key;
pub mod client_credential;
pub mod config;
pub mod email;
pub mod email_otp;
pub mod error;
pub mod federated;
pub mod guard;
pub mod hasher;
pub mod models;
pub mod service;
pub mod store;
pub mod token;
pub mod totp;

pub use config::AuthConfig;
pub use error::AuthError;
pub use guard::{AuthContext, AuthGuard, AuthMethod};
pub use models::{Account, SecondFactorKind};
pub use service::{AuthService, LoginOutcome};
pub use token::{TokenKind, TokenSigner};
