//! Network registry.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{AuthService, Credential};
use crate::error::{Error, Result};
use crate::store::{Network, Store, bounded};
use crate::validation::{validate_address_range, validate_net_id};

/// Request body for creating a network.
#[derive(Debug, Clone, Deserialize)]
pub struct NewNetwork {
    #[serde(rename = "netid")]
    pub net_id: String,
    #[serde(rename = "addressrange")]
    pub address_range: String,
    #[serde(rename = "displayname", default)]
    pub display_name: Option<String>,
}

impl NewNetwork {
    pub fn new(net_id: impl Into<String>, address_range: impl Into<String>) -> Self {
        Self { net_id: net_id.into(), address_range: address_range.into(), display_name: None }
    }
}

pub struct NetworkRegistry {
    store: Arc<dyn Store>,
    auth: Arc<AuthService>,
    deadline: Duration,
}

impl NetworkRegistry {
    pub fn new(store: Arc<dyn Store>, auth: Arc<AuthService>, deadline: Duration) -> Self {
        Self { store, auth, deadline }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn create_network(&self, credential: &Credential, request: NewNetwork) -> Result<Network> {
        self.auth.require_superuser(credential)?;
        validate_net_id(&request.net_id)?;
        validate_address_range(&request.address_range)?;

        let mut network = Network::new(request.net_id, request.address_range);
        if let Some(display_name) = request.display_name.filter(|name| !name.trim().is_empty()) {
            network.display_name = display_name;
        }

        bounded(self.deadline, self.store.insert_network(&network)).await?;
        tracing::info!(net_id = %network.net_id, range = %network.address_range, "Created network");
        Ok(network)
    }

    pub async fn list_networks(&self, credential: &Credential) -> Result<Vec<Network>> {
        self.auth.require_superuser(credential)?;
        Ok(bounded(self.deadline, self.store.list_networks()).await?)
    }

    pub async fn get_network(&self, credential: &Credential, net_id: &str) -> Result<Network> {
        self.auth.require_superuser(credential)?;
        bounded(self.deadline, self.store.get_network(net_id))
            .await?
            .ok_or_else(|| network_not_found(net_id))
    }

    /// Delete a network and every access key scoped to it.
    pub async fn delete_network(&self, credential: &Credential, net_id: &str) -> Result<()> {
        self.auth.require_superuser(credential)?;

        match bounded(self.deadline, self.store.delete_network(net_id)).await? {
            Some(keys_removed) => {
                tracing::info!(net_id, keys_removed, "Deleted network");
                Ok(())
            }
            None => Err(network_not_found(net_id)),
        }
    }
}

pub(crate) fn network_not_found(net_id: &str) -> Error {
    Error::not_found(format!("network {net_id} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::store::Identity;
    use crate::testutil::{MASTER_KEY, TestStore, fast_auth_config};

    fn registry(store: &TestStore) -> NetworkRegistry {
        let deadline = Duration::from_secs(5);
        let auth = AuthService::new(store.shared(), &fast_auth_config(), deadline).unwrap();
        NetworkRegistry::new(store.shared(), Arc::new(auth), deadline)
    }

    fn root() -> Credential {
        Credential::bearer(MASTER_KEY)
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let store = TestStore::open().await;
        let networks = registry(&store);

        let created = networks.create_network(&root(), NewNetwork::new("skynet", "10.71.0.0/16")).await.unwrap();
        assert_eq!(created.display_name, "skynet");

        let listed = networks.list_networks(&root()).await.unwrap();
        assert_eq!(listed, vec![created.clone()]);
        assert_eq!(networks.get_network(&root(), "skynet").await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_duplicate_net_id_conflicts() {
        let store = TestStore::open().await;
        let networks = registry(&store);
        networks.create_network(&root(), NewNetwork::new("skynet", "10.71.0.0/16")).await.unwrap();

        let err = networks
            .create_network(&root(), NewNetwork::new("skynet", "10.72.0.0/16"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let listed = networks.list_networks(&root()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].address_range, "10.71.0.0/16");
    }

    #[tokio::test]
    async fn test_invalid_range_is_not_stored() {
        let store = TestStore::open().await;
        let networks = registry(&store);

        let err = networks.create_network(&root(), NewNetwork::new("skynet", "10.71.0.0/40")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert!(networks.list_networks(&root()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_display_name_override() {
        let store = TestStore::open().await;
        let networks = registry(&store);
        let request = NewNetwork { display_name: Some("Sky Net".into()), ..NewNetwork::new("skynet", "10.71.0.0/16") };

        let created = networks.create_network(&root(), request).await.unwrap();
        assert_eq!(created.display_name, "Sky Net");
    }

    #[tokio::test]
    async fn test_requires_authorization() {
        let store = TestStore::open().await;
        let networks = registry(&store);

        let err = networks
            .create_network(&Credential::anonymous(), NewNetwork::new("skynet", "10.71.0.0/16"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(networks.list_networks(&Credential::bearer("forged.token")).await.unwrap_err().kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_admin_token_is_not_superuser() {
        let store = TestStore::open().await;
        let deadline = Duration::from_secs(5);
        let auth = Arc::new(AuthService::new(store.shared(), &fast_auth_config(), deadline).unwrap());
        let hash = auth.hash_password("password").await.unwrap();
        store.insert_identity_if_absent(&Identity::new("admin", hash)).await.unwrap();
        let token = Credential::bearer(auth.authenticate("admin", "password").await.unwrap().token);
        let networks = NetworkRegistry::new(store.shared(), auth, deadline);

        let err = networks.create_network(&token, NewNetwork::new("skynet", "10.71.0.0/16")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        networks.create_network(&root(), NewNetwork::new("skynet", "10.71.0.0/16")).await.unwrap();
        let err = networks.delete_network(&token, "skynet").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(networks.list_networks(&root()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_absent_network() {
        let store = TestStore::open().await;
        let networks = registry(&store);

        let err = networks.delete_network(&root(), "skynet").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
