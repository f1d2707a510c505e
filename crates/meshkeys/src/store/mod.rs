//! Persistence boundary.
//!
//! The [`Store`] trait is the single authority for concurrent access: every
//! uniqueness rule and every conditional update is enforced here, so several
//! processes can share one database without any in-process locking.

pub mod migrations;
pub mod models;
pub mod pool;
mod sqlite;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use models::{AccessKey, Consumption, Identity, Network};
pub use sqlite::LibsqlStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Carries a caller-safe message.
    #[error("{0}")]
    Constraint(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("connection pool: {0}")]
    Pool(String),
    #[error(transparent)]
    Backend(libsql::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Primary result codes for SQLITE_BUSY and SQLITE_LOCKED.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether the error means another connection holds a lock we need.
pub(crate) fn is_busy(err: &libsql::Error) -> bool {
    match err {
        libsql::Error::SqliteFailure(code, message) => {
            matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED) || message.contains("database is locked")
        }
        _ => false,
    }
}

/// Lock contention that outlasted the busy wait is a timeout, not a backend fault.
impl From<libsql::Error> for StoreError {
    fn from(err: libsql::Error) -> Self {
        if is_busy(&err) {
            tracing::debug!("Store lock still held after busy wait: {err}");
            StoreError::Timeout
        } else {
            StoreError::Backend(err)
        }
    }
}

/// Bound a store future by `deadline`.
///
/// On expiry the operation may or may not have been applied.
pub async fn bounded<T, F>(deadline: Duration, operation: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(?deadline, "Store operation exceeded its deadline");
            Err(StoreError::Timeout)
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert the identity unless one already exists, as a single atomic write.
    async fn insert_identity_if_absent(&self, identity: &Identity) -> StoreResult<()>;

    async fn get_identity(&self, username: &str) -> StoreResult<Option<Identity>>;

    /// The admin identity, whatever its name.
    async fn current_identity(&self) -> StoreResult<Option<Identity>>;

    async fn count_identities(&self) -> StoreResult<u64>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_identity(&self, username: &str) -> StoreResult<bool>;

    async fn insert_network(&self, network: &Network) -> StoreResult<()>;

    async fn get_network(&self, net_id: &str) -> StoreResult<Option<Network>>;

    async fn list_networks(&self) -> StoreResult<Vec<Network>>;

    /// Delete a network together with its keys.
    ///
    /// Returns the number of keys removed, or `None` if the network was absent.
    async fn delete_network(&self, net_id: &str) -> StoreResult<Option<u64>>;

    /// Returns `false` when the owning network does not exist.
    async fn insert_key(&self, key: &AccessKey) -> StoreResult<bool>;

    async fn get_key(&self, net_id: &str, name: &str) -> StoreResult<Option<AccessKey>>;

    /// `None` when the network does not exist.
    async fn list_keys(&self, net_id: &str) -> StoreResult<Option<Vec<AccessKey>>>;

    async fn delete_key(&self, net_id: &str, name: &str) -> StoreResult<bool>;

    /// Take one use of a key with a single conditional update.
    async fn consume_key(
        &self,
        net_id: &str,
        name: &str,
        attempt: Option<&str>,
    ) -> StoreResult<Consumption>;
}
