//! Versioned schema migrations

use crate::error::Result;
use libsql::Connection;

/// Schema changes, applied in order. Each runs in its own transaction and
/// records its version in `schema_version`.
const MIGRATIONS: &[(i32, &str, &[&str])] = &[
    (
        1,
        "key-value storage for the local cache and pending log",
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ],
    ),
    (
        2,
        "entry table for databases acting as the store of record",
        &[
            "CREATE TABLE IF NOT EXISTS remote_entries (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                magnitude REAL NOT NULL,
                deleted_at TEXT,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_remote_entries_owner
                ON remote_entries(owner_id, timestamp)",
        ],
    ),
];

/// Apply every migration newer than the stored schema version
pub async fn run(conn: &Connection) -> Result<()> {
    let version = schema_version(conn).await?;

    for (target, description, statements) in MIGRATIONS.iter().filter(|(v, _, _)| *v > version) {
        apply(conn, *target, statements).await?;
        tracing::info!("Migrated database to version {target} ({description})");
    }
    Ok(())
}

async fn schema_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;
    let exists = match rows.next().await? {
        Some(row) => row.get::<i32>(0)? != 0,
        None => false,
    };
    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// libsql has no `execute_batch`, so statements run one by one inside a
/// transaction that is rolled back on the first failure.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let outcome = async {
        for statement in statements {
            conn.execute(statement, ()).await?;
        }
        conn.execute("INSERT INTO schema_version (version) VALUES (?)", libsql::params![version])
            .await?;
        conn.execute("COMMIT", ()).await?;
        Ok::<(), libsql::Error>(())
    }
    .await;

    if let Err(error) = outcome {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }
    Ok(())
}
