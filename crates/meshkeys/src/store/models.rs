use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as unix seconds
pub fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// The administrative identity. At most one row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    /// Argon2id PHC string
    pub password_hash: String,
    pub created_at: i64,
}

impl Identity {
    pub fn new(username: impl Into<String>, password_hash: String) -> Self {
        Self { username: username.into(), password_hash, created_at: unix_now() }
    }
}

/// A named virtual network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "netid")]
    pub net_id: String,
    #[serde(rename = "addressrange")]
    pub address_range: String,
    #[serde(rename = "displayname")]
    pub display_name: String,
    #[serde(rename = "createdat")]
    pub created_at: i64,
    #[serde(rename = "updatedat")]
    pub updated_at: i64,
}

impl Network {
    pub fn new(net_id: impl Into<String>, address_range: impl Into<String>) -> Self {
        let net_id = net_id.into();
        let now = unix_now();
        Self {
            display_name: net_id.clone(),
            net_id,
            address_range: address_range.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A bounded-use enrollment credential scoped to one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    #[serde(rename = "netid")]
    pub net_id: String,
    pub name: String,
    #[serde(rename = "uses")]
    pub uses_remaining: i64,
    pub value: String,
    #[serde(rename = "accessstring")]
    pub access_string: String,
    #[serde(rename = "createdat")]
    pub created_at: i64,
}

impl AccessKey {
    pub fn is_exhausted(&self) -> bool {
        self.uses_remaining <= 0
    }
}

/// Result of a conditional consume at the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumption {
    /// One use was taken; carries the key value.
    Consumed(String),
    /// The idempotency key was already used for this access key; nothing was taken.
    Replayed(String),
    Exhausted,
    KeyMissing,
    NetworkMissing,
    /// The idempotency key was already used for a different access key.
    AttemptMismatch,
}
