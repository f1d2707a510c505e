//! Shared fixtures for unit tests.

use std::ops::Deref;
use std::sync::Arc;

use tempfile::{TempDir, tempdir};

use crate::config::{self, Config};
use crate::store::{LibsqlStore, Store};

pub const MASTER_KEY: &str = "secretkey";

/// Argon2 parameters cheap enough for debug-mode tests.
pub fn fast_auth_config() -> config::Auth {
    config::Auth {
        master_key: MASTER_KEY.to_string(),
        token_secret: "test-token-secret".to_string(),
        argon2_memory_kib: 1024,
        argon2_iterations: 1,
        ..config::Auth::default()
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        store: config::Store {
            path: dir.path().join("meshkeys.db").to_string_lossy().to_string(),
            ..config::Store::default()
        },
        auth: fast_auth_config(),
        ..Config::default()
    }
}

/// A migrated store in a temporary directory that lives as long as the value.
pub struct TestStore {
    store: Arc<LibsqlStore>,
    _dir: TempDir,
}

impl TestStore {
    pub async fn open() -> Self {
        let dir = tempdir().expect("create temp dir");
        let config = test_config(&dir);
        let store = LibsqlStore::open(&config.store).await.expect("open test store");
        Self { store: Arc::new(store), _dir: dir }
    }

    pub fn shared(&self) -> Arc<dyn Store> {
        self.store.clone()
    }
}

impl Deref for TestStore {
    type Target = LibsqlStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
