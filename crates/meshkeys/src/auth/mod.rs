//! Authentication and authorization.
//!
//! Two kinds of bearer value exist:
//! - the superuser capability ([`MasterKey`]), configured out of band and
//!   never stored as an identity. Every network and key mutation requires it;
//! - a signed token ([`TokenSigner`]) minted by [`AuthService::authenticate`],
//!   which lets the admin manage its own identity.

pub mod capability;
pub mod password;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use capability::MasterKey;
pub use password::PasswordHasher;
pub use token::{Claims, TokenError, TokenSigner};

use crate::config;
use crate::error::{Error, Result};
use crate::store::{Store, bounded};

/// Deliberately identical for unknown users and wrong passwords.
const BAD_CREDENTIALS: &str = "invalid username or password";

/// A bearer value as presented by a caller, not yet checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential(Option<String>);

impl Credential {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn bearer(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() { Self(None) } else { Self(Some(value)) }
    }

    /// Parse an `authorization` header value of the form `Bearer <value>`.
    pub fn from_header(header: Option<&str>) -> Self {
        let Some(header) = header.map(str::trim) else {
            return Self::anonymous();
        };
        match header.split_once(' ') {
            Some((scheme, value)) if scheme.eq_ignore_ascii_case("bearer") => {
                Self::bearer(value.trim())
            }
            _ => Self::anonymous(),
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Returned by a successful authentication.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "AuthToken")]
    pub token: String,
    #[serde(rename = "ExpiresAt")]
    pub expires_at: i64,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    hasher: PasswordHasher,
    tokens: TokenSigner,
    master_key: MasterKey,
    deadline: Duration,
    /// Verified against only while no admin exists.
    decoy_hash: String,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, auth: &config::Auth, deadline: Duration) -> Result<Self> {
        let hasher = PasswordHasher::new(auth)?;
        let decoy_hash = hasher.hash("decoy password never assigned")?;
        let master_key = MasterKey::new(&auth.master_key);
        if !master_key.is_enabled() {
            tracing::warn!("No master key configured; superuser operations are disabled");
        }

        Ok(Self {
            store,
            tokens: TokenSigner::new(auth.token_secret.as_bytes(), auth.token_ttl()),
            hasher,
            master_key,
            deadline,
            decoy_hash,
        })
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Hash off the async executor; Argon2 is CPU-bound.
    pub async fn hash_password(&self, password: &str) -> Result<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| {
                tracing::error!("Password hashing task failed: {e}");
                Error::internal("password hashing failed")
            })?
    }

    async fn verify_password(&self, password: &str, stored: String) -> Result<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &stored)).await.map_err(|e| {
            tracing::error!("Password verification task failed: {e}");
            Error::internal("password verification failed")
        })
    }

    /// Check a username and password, minting a token on success.
    ///
    /// The password is always verified against the admin's own hash, even when
    /// the username does not match, so an unknown user and a wrong password
    /// cost the same whatever parameters that hash was made with.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Session> {
        let identity = bounded(self.deadline, self.store.current_identity()).await?;

        let (stored, known) = match identity {
            Some(identity) => {
                let known = identity.username == username;
                (identity.password_hash, known)
            }
            None => (self.decoy_hash.clone(), false),
        };
        let verified = self.verify_password(password, stored).await?;

        if !(known && verified) {
            tracing::info!("Rejected authentication attempt");
            return Err(Error::unauthorized(BAD_CREDENTIALS));
        }

        let (token, claims) = self.tokens.issue(username);
        tracing::info!(username, "Admin authenticated");
        Ok(Session { username: claims.username, token, expires_at: claims.expires_at })
    }

    /// Verify a token's signature and expiry and return the username it names.
    pub fn validate(&self, token: &str) -> Result<String> {
        match self.tokens.verify(token) {
            Ok(claims) => Ok(claims.username),
            Err(e) => {
                tracing::debug!("Token rejected: {e}");
                Err(Error::unauthorized("invalid or expired token"))
            }
        }
    }

    pub fn is_superuser(&self, credential: &Credential) -> bool {
        credential.value().is_some_and(|value| self.master_key.matches(value))
    }

    pub fn require_superuser(&self, credential: &Credential) -> Result<()> {
        if self.is_superuser(credential) {
            Ok(())
        } else {
            Err(Error::unauthorized("superuser capability required"))
        }
    }
}
