//! Control-plane core for a mesh network manager.
//!
//! A single admin identity, a registry of virtual networks, and bounded-use
//! access keys that let new members enroll into a network. All state lives in
//! a [`store::Store`]; the managers here hold no locks of their own.

pub mod admin;
pub mod auth;
pub mod config;
pub mod error;
pub mod keys;
pub mod networks;
pub mod store;
pub mod validation;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

pub use admin::{AdminBootstrap, AdminView};
pub use auth::{AuthService, Credential, Session};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use keys::{AccessKeyManager, NewKey};
pub use networks::{NetworkRegistry, NewNetwork};
pub use store::{AccessKey, LibsqlStore, Network, Store};

/// Every manager wired to one shared store.
pub struct ControlPlane {
    pub auth: Arc<AuthService>,
    pub admins: AdminBootstrap,
    pub networks: NetworkRegistry,
    pub keys: AccessKeyManager,
}

impl ControlPlane {
    /// Open (and migrate) the configured libSQL database.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = LibsqlStore::open(&config.store).await?;
        Self::with_store(Arc::new(store), config)
    }

    pub fn with_store(store: Arc<dyn Store>, config: &Config) -> Result<Self> {
        let deadline = config.store.operation_timeout();
        let auth = Arc::new(AuthService::new(store.clone(), &config.auth, deadline)?);

        Ok(Self {
            admins: AdminBootstrap::new(store.clone(), auth.clone(), deadline),
            networks: NetworkRegistry::new(store.clone(), auth.clone(), deadline),
            keys: AccessKeyManager::new(store, auth.clone(), deadline, &config.server.public_address),
            auth,
        })
    }
}
