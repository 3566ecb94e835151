//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// A libSQL database file (or in-memory database) with one shared connection
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open the database file at `path`, creating it and its parent
    /// directories when missing. Pending migrations run before returning.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let database = Self::connect(&path.to_string_lossy()).await?;
        tracing::debug!("Opened database at {}", path.display());
        Ok(database)
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(":memory:").await
    }

    async fn connect(location: &str) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.apply_pragmas().await?;
        migrations::run(&database.conn).await?;
        Ok(database)
    }

    async fn apply_pragmas(&self) -> Result<()> {
        // In-memory databases reject WAL
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        for pragma in ["PRAGMA synchronous = NORMAL;", "PRAGMA temp_store = MEMORY;"] {
            self.conn.execute(pragma, ()).await?;
        }
        Ok(())
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
