//! Signed bearer tokens.
//!
//! A token is `base64(claims) "." base64(hmac)` where the HMAC-SHA256 covers
//! the encoded claims. Tokens are not stored anywhere: they are trusted only
//! because the signature verifies under the process secret and the expiry has
//! not passed.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::store::models::unix_now;

/// Token format version for forward compatibility.
const TOKEN_VERSION: u8 = 1;

/// Random key length when no secret is configured.
const HMAC_KEY_LENGTH: usize = 32;

/// What a token asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "sub")]
    pub username: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("unsupported token version {0}")]
    UnsupportedVersion(u8),
    #[error("token expired")]
    Expired,
}

/// Issues and verifies bearer tokens under one HMAC key.
pub struct TokenSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    /// Use `secret` as the HMAC key. An empty secret falls back to a random key.
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        if secret.is_empty() {
            return Self::with_random_key(ttl);
        }
        Self { key: secret.to_vec(), ttl }
    }

    /// Tokens signed with a random key die with the process.
    pub fn with_random_key(ttl: Duration) -> Self {
        use rand::RngCore;
        let mut key = vec![0u8; HMAC_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> Hmac<Sha256> {
        // HMAC accepts keys of any length
        match <Hmac<Sha256>>::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
        }
    }

    pub fn issue(&self, username: &str) -> (String, Claims) {
        self.issue_at(username, unix_now())
    }

    pub fn issue_at(&self, username: &str, now: i64) -> (String, Claims) {
        let claims = Claims {
            version: TOKEN_VERSION,
            username: username.to_string(),
            issued_at: now,
            expires_at: now.saturating_add(self.ttl.as_secs() as i64),
        };

        // Serializing a struct of strings and integers cannot fail
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        (format!("{payload}.{signature}"), claims)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, unix_now())
    }

    /// Verify signature, version and expiry as of `now`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

        let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;

        if claims.version != TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion(claims.version));
        }
        if now >= claims.expires_at {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
