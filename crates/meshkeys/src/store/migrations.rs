use libsql::Connection;

use super::StoreResult;
use super::models::unix_now;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Safe to call from every process sharing the database file: each migration
/// runs in an IMMEDIATE transaction and re-checks the version inside it.
pub async fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    apply(conn, 1, "Identities, networks and access keys", MIGRATION_V1).await?;
    apply(conn, 2, "Idempotency records for key consumption", MIGRATION_V2).await?;

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> StoreResult<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn apply(conn: &Connection, version: i32, description: &str, statements: &[&str]) -> StoreResult<()> {
    let tx = conn.transaction_with_behavior(libsql::TransactionBehavior::Immediate).await?;

    if get_current_version(&tx).await? >= version {
        tx.rollback().await?;
        return Ok(());
    }

    for statement in statements {
        tx.execute(statement, ()).await?;
    }
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, unix_now(), description],
    )
    .await?;
    tx.commit().await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: Initial schema
///
/// `identities.slot` is pinned to 1, so the primary key admits a single row.
const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS identities (
        slot INTEGER PRIMARY KEY CHECK (slot = 1),
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS networks (
        net_id TEXT PRIMARY KEY,
        address_range TEXT NOT NULL,
        display_name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS access_keys (
        net_id TEXT NOT NULL,
        name TEXT NOT NULL,
        uses_remaining INTEGER NOT NULL CHECK (uses_remaining >= 0),
        value TEXT NOT NULL,
        access_string TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (net_id, name),
        FOREIGN KEY (net_id) REFERENCES networks(net_id) ON DELETE CASCADE
    )",
];

/// Migration v2: one row per consumption that carried an idempotency key
const MIGRATION_V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS key_consumptions (
        attempt_id TEXT PRIMARY KEY,
        net_id TEXT NOT NULL,
        key_name TEXT NOT NULL,
        consumed_at INTEGER NOT NULL,
        FOREIGN KEY (net_id, key_name) REFERENCES access_keys(net_id, name) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_key_consumptions_key ON key_consumptions(net_id, key_name)",
];
