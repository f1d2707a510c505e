use std::time::Duration;

use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

/// Hands out libsql connections configured for concurrent writers sharing one file.
pub struct LibsqlManager {
    database: Database,
    busy_timeout: Duration,
}

impl LibsqlManager {
    pub fn new(database: Database, busy_timeout: Duration) -> Self {
        Self { database, busy_timeout }
    }
}

/// Run a PRAGMA that reports its new value, discarding the row.
pub(super) async fn pragma(conn: &Connection, statement: &str) -> Result<(), LibsqlError> {
    let mut rows = conn.query(statement, ()).await?;
    while rows.next().await?.is_some() {}
    Ok(())
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        pragma(&conn, &format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis())).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        conn.query("SELECT 1", ())
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;
