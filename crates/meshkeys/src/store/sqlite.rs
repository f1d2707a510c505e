use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool::managed::Object;
use libsql::{Connection, Row, Transaction, TransactionBehavior, params};

use super::migrations::run_migrations;
use super::models::{AccessKey, Consumption, Identity, Network, unix_now};
use super::pool::{LibsqlManager, LibsqlPool, pragma};
use super::{Store, StoreError, StoreResult, is_busy};
use crate::config;

/// Primary result code for SQLITE_CONSTRAINT; extended codes keep it in the low byte.
const SQLITE_CONSTRAINT: i32 = 19;

const NETWORK_COLUMNS: &str = "net_id, address_range, display_name, created_at, updated_at";
const KEY_COLUMNS: &str = "net_id, name, uses_remaining, value, access_string, created_at";

const LOCK_RETRY_MIN: Duration = Duration::from_millis(2);
const LOCK_RETRY_MAX: Duration = Duration::from_millis(50);

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
    /// How long write-lock acquisition keeps retrying before giving up.
    lock_wait: Duration,
}

impl LibsqlStore {
    /// Open (or create) the database file named in the config and migrate it.
    pub async fn open(config: &config::Store) -> StoreResult<Self> {
        let database = libsql::Builder::new_local(&config.path).build().await?;
        let manager = LibsqlManager::new(database, config.busy_timeout());
        let pool = LibsqlPool::builder(manager)
            .max_size(config.pool_size.max(1))
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self { pool, lock_wait: config.operation_timeout() };
        let conn = store.conn().await?;
        // Readers never wait on a writer in WAL mode, so only writers contend.
        pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        run_migrations(&conn).await?;
        tracing::info!(path = %config.path, "Opened store");

        Ok(store)
    }

    async fn conn(&self) -> StoreResult<Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn is_constraint(err: &libsql::Error) -> bool {
    match err {
        libsql::Error::SqliteFailure(code, message) => {
            code & 0xff == SQLITE_CONSTRAINT || message.contains("constraint failed")
        }
        _ => false,
    }
}

/// Map a constraint violation to `Constraint(message)`, anything else as usual.
fn constraint_as(err: libsql::Error, message: impl FnOnce() -> String) -> StoreError {
    if is_constraint(&err) { StoreError::Constraint(message()) } else { StoreError::from(err) }
}

fn identity_from_row(row: &Row) -> StoreResult<Identity> {
    Ok(Identity { username: row.get(0)?, password_hash: row.get(1)?, created_at: row.get(2)? })
}

fn network_from_row(row: &Row) -> StoreResult<Network> {
    Ok(Network {
        net_id: row.get(0)?,
        address_range: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn key_from_row(row: &Row) -> StoreResult<AccessKey> {
    let uses_remaining: i64 = row.get(2)?;
    if uses_remaining < 0 {
        return Err(StoreError::Corrupt(format!("negative use count {uses_remaining}")));
    }

    Ok(AccessKey {
        net_id: row.get(0)?,
        name: row.get(1)?,
        uses_remaining,
        value: row.get(3)?,
        access_string: row.get(4)?,
        created_at: row.get(5)?,
    })
}

async fn exists(conn: &Connection, sql: &str, args: impl libsql::params::IntoParams) -> StoreResult<bool> {
    let mut rows = conn.query(sql, args).await?;
    Ok(rows.next().await?.is_some())
}

async fn network_exists(conn: &Connection, net_id: &str) -> StoreResult<bool> {
    exists(conn, "SELECT 1 FROM networks WHERE net_id = ?", params![net_id]).await
}

async fn key_exists(conn: &Connection, net_id: &str, name: &str) -> StoreResult<bool> {
    exists(conn, "SELECT 1 FROM access_keys WHERE net_id = ? AND name = ?", params![net_id, name])
        .await
}

/// Take the write lock with `BEGIN IMMEDIATE`.
///
/// Each attempt blocks for at most the connection's busy timeout; between
/// attempts the task sleeps, so a caller's deadline can fire while we wait.
async fn begin_immediate(conn: &Connection, lock_wait: Duration) -> StoreResult<Transaction> {
    let started = Instant::now();
    let mut backoff = LOCK_RETRY_MIN;

    loop {
        match conn.transaction_with_behavior(TransactionBehavior::Immediate).await {
            Ok(tx) => return Ok(tx),
            Err(err) if is_busy(&err) => {
                if started.elapsed() >= lock_wait {
                    tracing::debug!(waited = ?started.elapsed(), "Gave up waiting for the write lock");
                    return Err(StoreError::Timeout);
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(LOCK_RETRY_MAX);
            }
            Err(err) => return Err(StoreError::Backend(err)),
        }
    }
}

/// Run `body` inside an IMMEDIATE transaction, committing on success.
///
/// IMMEDIATE takes the write lock up front, so concurrent writers queue for it
/// instead of failing on a read-to-write lock upgrade.
macro_rules! immediate {
    ($store:expr, $conn:expr, |$tx:ident| $body:expr) => {{
        let $tx = begin_immediate(&$conn, $store.lock_wait).await?;
        let outcome: StoreResult<_> = $body;
        match outcome {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = $tx.rollback().await {
                    tracing::warn!("Rollback failed: {rollback}");
                }
                Err(err)
            }
        }
    }};
}

async fn insert_identity_in(conn: &Connection, identity: &Identity) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO identities (slot, username, password_hash, created_at) VALUES (1, ?, ?, ?)",
        params![identity.username.as_str(), identity.password_hash.as_str(), identity.created_at],
    )
    .await
    .map_err(|e| constraint_as(e, || "an admin already exists".to_string()))?;

    Ok(())
}

async fn delete_identity_in(conn: &Connection, username: &str) -> StoreResult<bool> {
    let removed = conn.execute("DELETE FROM identities WHERE username = ?", params![username]).await?;
    Ok(removed > 0)
}

async fn insert_network_in(conn: &Connection, network: &Network) -> StoreResult<()> {
    conn.execute(
        &format!("INSERT INTO networks ({NETWORK_COLUMNS}) VALUES (?, ?, ?, ?, ?)"),
        params![
            network.net_id.as_str(),
            network.address_range.as_str(),
            network.display_name.as_str(),
            network.created_at,
            network.updated_at
        ],
    )
    .await
    .map_err(|e| constraint_as(e, || format!("network {} already exists", network.net_id)))?;

    Ok(())
}

async fn insert_key_in(conn: &Connection, key: &AccessKey) -> StoreResult<bool> {
    if !network_exists(conn, &key.net_id).await? {
        return Ok(false);
    }

    conn.execute(
        &format!("INSERT INTO access_keys ({KEY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
        params![
            key.net_id.as_str(),
            key.name.as_str(),
            key.uses_remaining,
            key.value.as_str(),
            key.access_string.as_str(),
            key.created_at
        ],
    )
    .await
    .map_err(|e| {
        constraint_as(e, || format!("access key {} already exists in network {}", key.name, key.net_id))
    })?;

    Ok(true)
}

async fn delete_network_in(conn: &Connection, net_id: &str) -> StoreResult<Option<u64>> {
    if !network_exists(conn, net_id).await? {
        return Ok(None);
    }

    conn.execute("DELETE FROM key_consumptions WHERE net_id = ?", params![net_id]).await?;
    let keys_removed =
        conn.execute("DELETE FROM access_keys WHERE net_id = ?", params![net_id]).await?;
    conn.execute("DELETE FROM networks WHERE net_id = ?", params![net_id]).await?;

    Ok(Some(keys_removed))
}

async fn delete_key_in(conn: &Connection, net_id: &str, name: &str) -> StoreResult<bool> {
    conn.execute(
        "DELETE FROM key_consumptions WHERE net_id = ? AND key_name = ?",
        params![net_id, name],
    )
    .await?;
    let removed = conn
        .execute("DELETE FROM access_keys WHERE net_id = ? AND name = ?", params![net_id, name])
        .await?;

    Ok(removed > 0)
}

async fn list_keys_in(conn: &Connection, net_id: &str) -> StoreResult<Option<Vec<AccessKey>>> {
    if !network_exists(conn, net_id).await? {
        return Ok(None);
    }

    let mut rows = conn
        .query(
            &format!("SELECT {KEY_COLUMNS} FROM access_keys WHERE net_id = ? ORDER BY name"),
            params![net_id],
        )
        .await?;
    let mut keys = Vec::new();
    while let Some(row) = rows.next().await? {
        keys.push(key_from_row(&row)?);
    }

    Ok(Some(keys))
}

/// Look up a prior consumption recorded under `attempt`.
async fn replayed(conn: &Connection, attempt: &str, net_id: &str, name: &str) -> StoreResult<Option<Consumption>> {
    let mut rows = conn
        .query(
            "SELECT c.net_id, c.key_name, k.value FROM key_consumptions c
             JOIN access_keys k ON k.net_id = c.net_id AND k.name = c.key_name
             WHERE c.attempt_id = ?",
            params![attempt],
        )
        .await?;

    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    let recorded_net: String = row.get(0)?;
    let recorded_key: String = row.get(1)?;
    let value: String = row.get(2)?;

    if recorded_net == net_id && recorded_key == name {
        Ok(Some(Consumption::Replayed(value)))
    } else {
        Ok(Some(Consumption::AttemptMismatch))
    }
}

/// The decrement and the exhaustion test are one statement; a row comes back
/// only when a use was actually taken.
async fn take_one_use(conn: &Connection, net_id: &str, name: &str) -> StoreResult<Option<String>> {
    let mut rows = conn
        .query(
            "UPDATE access_keys SET uses_remaining = uses_remaining - 1
             WHERE net_id = ? AND name = ? AND uses_remaining > 0
             RETURNING value",
            params![net_id, name],
        )
        .await?;

    let value = match rows.next().await? {
        Some(row) => Some(row.get::<String>(0)?),
        None => None,
    };
    while rows.next().await?.is_some() {}

    Ok(value)
}

async fn consume_in(
    conn: &Connection,
    net_id: &str,
    name: &str,
    attempt: Option<&str>,
) -> StoreResult<Consumption> {
    if let Some(attempt) = attempt {
        if let Some(previous) = replayed(conn, attempt, net_id, name).await? {
            return Ok(previous);
        }
    }

    if let Some(value) = take_one_use(conn, net_id, name).await? {
        if let Some(attempt) = attempt {
            conn.execute(
                "INSERT INTO key_consumptions (attempt_id, net_id, key_name, consumed_at) VALUES (?, ?, ?, ?)",
                params![attempt, net_id, name, unix_now()],
            )
            .await?;
        }
        return Ok(Consumption::Consumed(value));
    }

    if key_exists(conn, net_id, name).await? {
        Ok(Consumption::Exhausted)
    } else if network_exists(conn, net_id).await? {
        Ok(Consumption::KeyMissing)
    } else {
        Ok(Consumption::NetworkMissing)
    }
}

#[async_trait]
impl Store for LibsqlStore {
    async fn insert_identity_if_absent(&self, identity: &Identity) -> StoreResult<()> {
        let conn = self.conn().await?;
        immediate!(self, conn, |tx| insert_identity_in(&tx, identity).await)
    }

    async fn get_identity(&self, username: &str) -> StoreResult<Option<Identity>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT username, password_hash, created_at FROM identities WHERE username = ?",
                params![username],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(identity_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn current_identity(&self) -> StoreResult<Option<Identity>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query("SELECT username, password_hash, created_at FROM identities WHERE slot = 1", ())
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(identity_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn count_identities(&self) -> StoreResult<u64> {
        let conn = self.conn().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM identities", ()).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    async fn delete_identity(&self, username: &str) -> StoreResult<bool> {
        let conn = self.conn().await?;
        immediate!(self, conn, |tx| delete_identity_in(&tx, username).await)
    }

    async fn insert_network(&self, network: &Network) -> StoreResult<()> {
        let conn = self.conn().await?;
        immediate!(self, conn, |tx| insert_network_in(&tx, network).await)
    }

    async fn get_network(&self, net_id: &str) -> StoreResult<Option<Network>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {NETWORK_COLUMNS} FROM networks WHERE net_id = ?"), params![net_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(network_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_networks(&self) -> StoreResult<Vec<Network>> {
        let conn = self.conn().await?;
        let mut rows =
            conn.query(&format!("SELECT {NETWORK_COLUMNS} FROM networks ORDER BY net_id"), ()).await?;

        let mut networks = Vec::new();
        while let Some(row) = rows.next().await? {
            networks.push(network_from_row(&row)?);
        }

        Ok(networks)
    }

    async fn delete_network(&self, net_id: &str) -> StoreResult<Option<u64>> {
        let conn = self.conn().await?;
        immediate!(self, conn, |tx| delete_network_in(&tx, net_id).await)
    }

    async fn insert_key(&self, key: &AccessKey) -> StoreResult<bool> {
        let conn = self.conn().await?;
        immediate!(self, conn, |tx| insert_key_in(&tx, key).await)
    }

    async fn get_key(&self, net_id: &str, name: &str) -> StoreResult<Option<AccessKey>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {KEY_COLUMNS} FROM access_keys WHERE net_id = ? AND name = ?"),
                params![net_id, name],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(key_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_keys(&self, net_id: &str) -> StoreResult<Option<Vec<AccessKey>>> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let keys = list_keys_in(&tx, net_id).await;
        tx.rollback().await?;
        keys
    }

    async fn delete_key(&self, net_id: &str, name: &str) -> StoreResult<bool> {
        let conn = self.conn().await?;
        immediate!(self, conn, |tx| delete_key_in(&tx, net_id, name).await)
    }

    async fn consume_key(
        &self,
        net_id: &str,
        name: &str,
        attempt: Option<&str>,
    ) -> StoreResult<Consumption> {
        let conn = self.conn().await?;
        immediate!(self, conn, |tx| consume_in(&tx, net_id, name, attempt).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bounded;
    use tempfile::{TempDir, tempdir};

    async fn open_store() -> (LibsqlStore, TempDir) {
        let dir = tempdir().unwrap();
        let config = config::Store {
            path: dir.path().join("store.db").to_string_lossy().to_string(),
            ..config::Store::default()
        };
        (LibsqlStore::open(&config).await.unwrap(), dir)
    }

    fn key(net_id: &str, name: &str, uses: i64) -> AccessKey {
        AccessKey {
            net_id: net_id.into(),
            name: name.into(),
            uses_remaining: uses,
            value: format!("value-{name}"),
            access_string: String::new(),
            created_at: unix_now(),
        }
    }

    #[tokio::test]
    async fn test_second_identity_hits_singleton_constraint() {
        let (store, _dir) = open_store().await;

        store.insert_identity_if_absent(&Identity::new("admin", "hash".into())).await.unwrap();
        let err = store
            .insert_identity_if_absent(&Identity::new("other", "hash".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(store.count_identities().await.unwrap(), 1);
        assert!(store.get_identity("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_identity_reports_absence() {
        let (store, _dir) = open_store().await;

        assert!(!store.delete_identity("admin").await.unwrap());
        store.insert_identity_if_absent(&Identity::new("admin", "hash".into())).await.unwrap();
        assert!(store.delete_identity("admin").await.unwrap());
        assert_eq!(store.count_identities().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_key_requires_network() {
        let (store, _dir) = open_store().await;

        assert!(!store.insert_key(&key("skynet", "join", 3)).await.unwrap());
        store.insert_network(&Network::new("skynet", "10.71.0.0/16")).await.unwrap();
        assert!(store.insert_key(&key("skynet", "join", 3)).await.unwrap());

        let err = store.insert_key(&key("skynet", "join", 3)).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_consume_counts_down_then_exhausts() {
        let (store, _dir) = open_store().await;
        store.insert_network(&Network::new("skynet", "10.71.0.0/16")).await.unwrap();
        store.insert_key(&key("skynet", "join", 2)).await.unwrap();

        for _ in 0..2 {
            let outcome = store.consume_key("skynet", "join", None).await.unwrap();
            assert_eq!(outcome, Consumption::Consumed("value-join".into()));
        }
        assert_eq!(store.consume_key("skynet", "join", None).await.unwrap(), Consumption::Exhausted);
        assert_eq!(store.get_key("skynet", "join").await.unwrap().unwrap().uses_remaining, 0);
        assert_eq!(store.consume_key("skynet", "nope", None).await.unwrap(), Consumption::KeyMissing);
        assert_eq!(store.consume_key("nonet", "join", None).await.unwrap(), Consumption::NetworkMissing);
    }

    #[tokio::test]
    async fn test_consume_with_attempt_is_idempotent() {
        let (store, _dir) = open_store().await;
        store.insert_network(&Network::new("skynet", "10.71.0.0/16")).await.unwrap();
        store.insert_network(&Network::new("other", "10.72.0.0/16")).await.unwrap();
        store.insert_key(&key("skynet", "join", 5)).await.unwrap();
        store.insert_key(&key("other", "join", 5)).await.unwrap();

        let first = store.consume_key("skynet", "join", Some("attempt-1")).await.unwrap();
        let again = store.consume_key("skynet", "join", Some("attempt-1")).await.unwrap();
        assert_eq!(first, Consumption::Consumed("value-join".into()));
        assert_eq!(again, Consumption::Replayed("value-join".into()));
        assert_eq!(store.get_key("skynet", "join").await.unwrap().unwrap().uses_remaining, 4);

        let mismatch = store.consume_key("other", "join", Some("attempt-1")).await.unwrap();
        assert_eq!(mismatch, Consumption::AttemptMismatch);
        assert_eq!(store.get_key("other", "join").await.unwrap().unwrap().uses_remaining, 5);
    }

    #[tokio::test]
    async fn test_delete_network_removes_keys_and_attempts() {
        let (store, _dir) = open_store().await;
        store.insert_network(&Network::new("skynet", "10.71.0.0/16")).await.unwrap();
        store.insert_key(&key("skynet", "a", 1)).await.unwrap();
        store.insert_key(&key("skynet", "b", 1)).await.unwrap();
        store.consume_key("skynet", "a", Some("attempt-a")).await.unwrap();

        assert_eq!(store.delete_network("skynet").await.unwrap(), Some(2));
        assert_eq!(store.delete_network("skynet").await.unwrap(), None);
        assert!(store.list_keys("skynet").await.unwrap().is_none());
        assert!(store.get_key("skynet", "a").await.unwrap().is_none());

        // A recreated key must not be shadowed by the old attempt record.
        store.insert_network(&Network::new("skynet", "10.71.0.0/16")).await.unwrap();
        store.insert_key(&key("skynet", "a", 1)).await.unwrap();
        let outcome = store.consume_key("skynet", "a", Some("attempt-a")).await.unwrap();
        assert_eq!(outcome, Consumption::Consumed("value-a".into()));
    }

    #[test]
    fn test_busy_errors_are_timeouts() {
        let busy = libsql::Error::SqliteFailure(5, "database is locked".into());
        assert!(matches!(StoreError::from(busy), StoreError::Timeout));
        // SQLITE_LOCKED_SHAREDCACHE keeps the primary code in the low byte.
        let locked = libsql::Error::SqliteFailure(6 | (1 << 8), "database table is locked".into());
        assert!(matches!(StoreError::from(locked), StoreError::Timeout));

        let other = libsql::Error::SqliteFailure(1, "no such table: nope".into());
        assert!(matches!(StoreError::from(other), StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_held_write_lock_fails_within_deadline() {
        let dir = tempdir().unwrap();
        let config = config::Store {
            path: dir.path().join("store.db").to_string_lossy().to_string(),
            busy_timeout_ms: 3_000,
            operation_timeout_ms: 200,
            ..config::Store::default()
        };
        let store = LibsqlStore::open(&config).await.unwrap();
        store.insert_network(&Network::new("skynet", "10.71.0.0/16")).await.unwrap();
        store.insert_key(&key("skynet", "join", 3)).await.unwrap();

        let other = libsql::Builder::new_local(&config.path).build().await.unwrap();
        let blocker = other.connect().unwrap();
        blocker.execute("BEGIN IMMEDIATE", ()).await.unwrap();

        let started = Instant::now();
        let err = bounded(config.operation_timeout(), store.consume_key("skynet", "join", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());

        // Reads are not held up by the writer.
        assert_eq!(store.get_key("skynet", "join").await.unwrap().unwrap().uses_remaining, 3);

        blocker.execute("ROLLBACK", ()).await.unwrap();
        let outcome = store.consume_key("skynet", "join", None).await.unwrap();
        assert_eq!(outcome, Consumption::Consumed("value-join".into()));
    }

    #[tokio::test]
    async fn test_current_identity_ignores_username() {
        let (store, _dir) = open_store().await;
        assert!(store.current_identity().await.unwrap().is_none());

        store.insert_identity_if_absent(&Identity::new("admin", "hash".into())).await.unwrap();
        assert_eq!(store.current_identity().await.unwrap().unwrap().username, "admin");
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let config = config::Store {
            path: dir.path().join("store.db").to_string_lossy().to_string(),
            ..config::Store::default()
        };

        {
            let store = LibsqlStore::open(&config).await.unwrap();
            store.insert_network(&Network::new("skynet", "10.71.0.0/16")).await.unwrap();
        }

        let store = LibsqlStore::open(&config).await.unwrap();
        let networks = store.list_networks().await.unwrap();
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].display_name, "skynet");
    }
}
