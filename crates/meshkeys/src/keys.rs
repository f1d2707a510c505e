//! Access keys: named, bounded-use enrollment credentials scoped to a network.
//!
//! The use counter is owned by the store. [`AccessKeyManager::consume_key`]
//! issues one conditional decrement per call and never reads the counter to
//! decide whether to write it, so concurrent consumers (in this process or any
//! other sharing the database) can never take more uses than a key was created
//! with.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use serde::Deserialize;

use crate::auth::{AuthService, Credential};
use crate::error::{Error, Result};
use crate::networks::network_not_found;
use crate::store::models::unix_now;
use crate::store::{AccessKey, Consumption, Store, bounded};
use crate::validation::{validate_key_name, validate_net_id};

const GENERATED_NAME_LEN: usize = 5;
const KEY_VALUE_BYTES: usize = 16;

/// Request body for creating a key.
#[derive(Debug, Clone, Deserialize)]
pub struct NewKey {
    /// Empty means a generated name.
    #[serde(default)]
    pub name: String,
    pub uses: i64,
}

impl NewKey {
    pub fn new(name: impl Into<String>, uses: i64) -> Self {
        Self { name: name.into(), uses }
    }
}

pub struct AccessKeyManager {
    store: Arc<dyn Store>,
    auth: Arc<AuthService>,
    deadline: Duration,
    /// Embedded in access strings so joining nodes know where to enroll.
    server_address: String,
}

fn generate_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_NAME_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

fn generate_value() -> String {
    let mut bytes = [0u8; KEY_VALUE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `base64("<server>|<network>|<value>")`, everything a node needs to join.
pub fn access_string(server_address: &str, net_id: &str, value: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{server_address}|{net_id}|{value}"))
}

fn key_not_found(net_id: &str, name: &str) -> Error {
    Error::not_found(format!("access key {name} not found in network {net_id}"))
}

impl AccessKeyManager {
    pub fn new(
        store: Arc<dyn Store>,
        auth: Arc<AuthService>,
        deadline: Duration,
        server_address: impl Into<String>,
    ) -> Self {
        Self { store, auth, deadline, server_address: server_address.into() }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn create_key(
        &self,
        credential: &Credential,
        net_id: &str,
        request: NewKey,
    ) -> Result<AccessKey> {
        self.auth.require_superuser(credential)?;
        if request.uses <= 0 {
            return Err(Error::invalid("uses must be a positive number"));
        }
        validate_net_id(net_id).map_err(|_| network_not_found(net_id))?;
        let name = if request.name.is_empty() { generate_name() } else { request.name };
        validate_key_name(&name)?;

        let value = generate_value();
        let key = AccessKey {
            net_id: net_id.to_string(),
            access_string: access_string(&self.server_address, net_id, &value),
            name,
            uses_remaining: request.uses,
            value,
            created_at: unix_now(),
        };

        if !bounded(self.deadline, self.store.insert_key(&key)).await? {
            return Err(network_not_found(net_id));
        }

        tracing::info!(
            net_id,
            name = %key.name,
            uses = key.uses_remaining,
            "Created access key"
        );
        Ok(key)
    }

    pub async fn list_keys(&self, credential: &Credential, net_id: &str) -> Result<Vec<AccessKey>> {
        self.auth.require_superuser(credential)?;
        bounded(self.deadline, self.store.list_keys(net_id))
            .await?
            .ok_or_else(|| network_not_found(net_id))
    }

    pub async fn get_key(&self, credential: &Credential, net_id: &str, name: &str) -> Result<AccessKey> {
        self.auth.require_superuser(credential)?;
        self.lookup(net_id, name).await
    }

    /// Resolve a key, naming whichever of network or key is missing.
    async fn lookup(&self, net_id: &str, name: &str) -> Result<AccessKey> {
        if let Some(key) = bounded(self.deadline, self.store.get_key(net_id, name)).await? {
            return Ok(key);
        }
        match bounded(self.deadline, self.store.get_network(net_id)).await? {
            Some(_) => Err(key_not_found(net_id, name)),
            None => Err(network_not_found(net_id)),
        }
    }

    pub async fn delete_key(&self, credential: &Credential, net_id: &str, name: &str) -> Result<()> {
        self.auth.require_superuser(credential)?;

        if bounded(self.deadline, self.store.delete_key(net_id, name)).await? {
            tracing::info!(net_id, name, "Deleted access key");
            return Ok(());
        }
        match bounded(self.deadline, self.store.get_network(net_id)).await? {
            Some(_) => Err(key_not_found(net_id, name)),
            None => Err(network_not_found(net_id)),
        }
    }

    /// Take one use of a key and return its secret value.
    ///
    /// `attempt` makes the call idempotent: retrying with the same attempt id
    /// after a timeout returns the value again without taking a second use.
    pub async fn consume_key(&self, net_id: &str, name: &str, attempt: Option<&str>) -> Result<String> {
        let attempt = attempt.filter(|attempt| !attempt.is_empty());

        match bounded(self.deadline, self.store.consume_key(net_id, name, attempt)).await? {
            Consumption::Consumed(value) => {
                tracing::info!(net_id, name, "Consumed access key use");
                Ok(value)
            }
            Consumption::Replayed(value) => {
                tracing::debug!(net_id, name, "Replayed access key consumption");
                Ok(value)
            }
            Consumption::Exhausted => {
                tracing::debug!(net_id, name, "Access key exhausted");
                Err(Error::Exhausted { net_id: net_id.to_string(), name: name.to_string() })
            }
            Consumption::KeyMissing => Err(key_not_found(net_id, name)),
            Consumption::NetworkMissing => Err(network_not_found(net_id)),
            Consumption::AttemptMismatch => {
                Err(Error::conflict("attempt id was already used for a different access key"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::networks::{NetworkRegistry, NewNetwork};
    use crate::store::Identity;
    use crate::testutil::{MASTER_KEY, TestStore, fast_auth_config};

    struct Fixture {
        auth: Arc<AuthService>,
        networks: NetworkRegistry,
        keys: AccessKeyManager,
        store: TestStore,
    }

    async fn fixture() -> Fixture {
        let store = TestStore::open().await;
        let deadline = Duration::from_secs(5);
        let auth = Arc::new(AuthService::new(store.shared(), &fast_auth_config(), deadline).unwrap());
        let networks = NetworkRegistry::new(store.shared(), auth.clone(), deadline);
        let keys = AccessKeyManager::new(store.shared(), auth.clone(), deadline, "mesh.example:8081");
        networks.create_network(&root(), NewNetwork::new("skynet", "10.71.0.0/16")).await.unwrap();
        Fixture { auth, networks, keys, store }
    }

    fn root() -> Credential {
        Credential::bearer(MASTER_KEY)
    }

    #[tokio::test]
    async fn test_create_key_fills_in_secret() {
        let f = fixture().await;
        let key = f.keys.create_key(&root(), "skynet", NewKey::new("skynet", 10)).await.unwrap();

        assert_eq!(key.uses_remaining, 10);
        assert_eq!(key.value.len(), 2 * KEY_VALUE_BYTES);
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&key.access_string).unwrap()).unwrap();
        assert_eq!(decoded, format!("mesh.example:8081|skynet|{}", key.value));
    }

    #[tokio::test]
    async fn test_generated_name() {
        let f = fixture().await;
        let key = f.keys.create_key(&root(), "skynet", NewKey::new("", 1)).await.unwrap();

        assert_eq!(key.name.len(), GENERATED_NAME_LEN);
        assert!(validate_key_name(&key.name).is_ok());
    }

    #[tokio::test]
    async fn test_zero_or_negative_uses_rejected() {
        let f = fixture().await;

        for uses in [0, -3] {
            let err = f.keys.create_key(&root(), "skynet", NewKey::new("skynet", uses)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Invalid);
        }
        assert!(f.keys.list_keys(&root(), "skynet").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts_within_network_only() {
        let f = fixture().await;
        f.networks.create_network(&root(), NewNetwork::new("other", "10.72.0.0/16")).await.unwrap();
        f.keys.create_key(&root(), "skynet", NewKey::new("join", 1)).await.unwrap();

        let err = f.keys.create_key(&root(), "skynet", NewKey::new("join", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(f.keys.create_key(&root(), "other", NewKey::new("join", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_network() {
        let f = fixture().await;

        let err = f.keys.create_key(&root(), "nonet", NewKey::new("join", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = f.keys.list_keys(&root(), "nonet").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = f.keys.delete_key(&root(), "nonet", "join").await.unwrap_err();
        assert_eq!(err.to_string(), "network nonet not found");
    }

    #[tokio::test]
    async fn test_admin_token_cannot_manage_keys() {
        let f = fixture().await;
        let hash = f.auth.hash_password("password").await.unwrap();
        f.store.insert_identity_if_absent(&Identity::new("admin", hash)).await.unwrap();
        let token = Credential::bearer(f.auth.authenticate("admin", "password").await.unwrap().token);

        let err = f.keys.create_key(&token, "skynet", NewKey::new("join", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        f.keys.create_key(&root(), "skynet", NewKey::new("join", 1)).await.unwrap();
        let err = f.keys.delete_key(&token, "skynet", "join").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(f.keys.list_keys(&root(), "skynet").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_key() {
        let f = fixture().await;
        f.keys.create_key(&root(), "skynet", NewKey::new("join", 1)).await.unwrap();

        f.keys.delete_key(&root(), "skynet", "join").await.unwrap();
        let err = f.keys.delete_key(&root(), "skynet", "join").await.unwrap_err();
        assert_eq!(err.to_string(), "access key join not found in network skynet");
        let err = f.keys.get_key(&root(), "skynet", "join").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_consume_until_exhausted_keeps_key() {
        let f = fixture().await;
        let key = f.keys.create_key(&root(), "skynet", NewKey::new("join", 2)).await.unwrap();

        assert_eq!(f.keys.consume_key("skynet", "join", None).await.unwrap(), key.value);
        assert_eq!(f.keys.consume_key("skynet", "join", None).await.unwrap(), key.value);
        let err = f.keys.consume_key("skynet", "join", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhausted);

        let stored = f.keys.get_key(&root(), "skynet", "join").await.unwrap();
        assert!(stored.is_exhausted());
        assert_eq!(stored.uses_remaining, 0);
    }

    #[tokio::test]
    async fn test_consume_replay_does_not_take_another_use() {
        let f = fixture().await;
        f.keys.create_key(&root(), "skynet", NewKey::new("join", 1)).await.unwrap();

        let first = f.keys.consume_key("skynet", "join", Some("node-7")).await.unwrap();
        let retry = f.keys.consume_key("skynet", "join", Some("node-7")).await.unwrap();
        assert_eq!(first, retry);

        let err = f.keys.consume_key("skynet", "join", Some("node-8")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhausted);
    }

    #[tokio::test]
    async fn test_consume_missing_key() {
        let f = fixture().await;

        let err = f.keys.consume_key("skynet", "join", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = f.keys.consume_key("nonet", "join", None).await.unwrap_err();
        assert_eq!(err.to_string(), "network nonet not found");
    }
}
