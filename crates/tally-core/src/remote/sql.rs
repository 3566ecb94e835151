//! libSQL database acting as the remote store of record

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Value};

use crate::db::Database;
use crate::models::{Category, Entry, EntryDraft, EntryId, EntryPatch};

use super::{with_durable_id, RemoteBatch, RemoteError, RemoteGateway, RemoteResult, StagedWrite};

const ENTRY_COLUMNS: &str = "id, owner_id, name, category, timestamp, magnitude, deleted_at";

impl From<libsql::Error> for RemoteError {
    fn from(error: libsql::Error) -> Self {
        Self::Unavailable(error.to_string())
    }
}

/// Remote gateway over the `remote_entries` table
pub struct LibSqlRemote {
    db: Database,
}

impl LibSqlRemote {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (and migrate) the database at `path`
    pub async fn open(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    fn conn(&self) -> &Connection {
        self.db.connection()
    }
}

impl RemoteGateway for LibSqlRemote {
    type Batch = LibSqlBatch;

    async fn fetch_all(&self, user_id: &str) -> RemoteResult<Vec<Entry>> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM remote_entries
                     WHERE owner_id = ? ORDER BY timestamp ASC"
                ),
                [user_id],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(parse_entry(&row)?);
        }
        Ok(entries)
    }

    async fn create(&self, entry: &Entry) -> RemoteResult<Entry> {
        let created = with_durable_id(entry);
        insert_entry(self.conn(), &created).await?;
        tracing::debug!("Created remote entry {}", created.id);
        Ok(created)
    }

    async fn update(&self, id: &EntryId, patch: &EntryPatch) -> RemoteResult<()> {
        update_entry(self.conn(), id, patch).await
    }

    async fn soft_delete(&self, id: &EntryId, at: DateTime<Utc>) -> RemoteResult<()> {
        delete_entry(self.conn(), id, at).await
    }

    async fn purge(&self, id: &EntryId) -> RemoteResult<()> {
        self.conn()
            .execute("DELETE FROM remote_entries WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    fn begin_batch(&self) -> LibSqlBatch {
        LibSqlBatch {
            conn: self.conn().clone(),
            writes: Vec::new(),
        }
    }
}

/// Batch committed as one SQL transaction
pub struct LibSqlBatch {
    conn: Connection,
    writes: Vec<StagedWrite>,
}

impl LibSqlBatch {
    async fn apply(&self, write: &StagedWrite) -> RemoteResult<()> {
        match write {
            StagedWrite::Create(entry) => insert_entry(&self.conn, entry).await,
            StagedWrite::Update { id, patch } => update_entry(&self.conn, id, patch).await,
            StagedWrite::Delete { id, at } => delete_entry(&self.conn, id, *at).await,
        }
    }
}

impl RemoteBatch for LibSqlBatch {
    fn stage_create(&mut self, entry: &Entry) -> EntryId {
        let created = with_durable_id(entry);
        let id = created.id.clone();
        self.writes.push(StagedWrite::Create(created));
        id
    }

    fn stage_update(&mut self, id: &EntryId, patch: &EntryPatch) {
        self.writes.push(StagedWrite::Update {
            id: id.clone(),
            patch: patch.clone(),
        });
    }

    fn stage_delete(&mut self, id: &EntryId, at: DateTime<Utc>) {
        self.writes.push(StagedWrite::Delete { id: id.clone(), at });
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> RemoteResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        for write in &self.writes {
            if let Err(e) = self.apply(write).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        tracing::debug!("Committed {} remote writes", self.writes.len());
        Ok(())
    }
}

async fn insert_entry(conn: &Connection, entry: &Entry) -> RemoteResult<()> {
    conn.execute(
        "INSERT INTO remote_entries
            (id, owner_id, name, category, timestamp, magnitude, deleted_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        libsql::params![
            entry.id.as_str(),
            entry.owner_id.as_str(),
            entry.name.as_str(),
            entry.category.as_str(),
            format_time(entry.timestamp),
            entry.magnitude,
            optional_text(entry.deleted_at().map(format_time)),
            Utc::now().timestamp_millis(),
        ],
    )
    .await?;
    Ok(())
}

async fn update_entry(conn: &Connection, id: &EntryId, patch: &EntryPatch) -> RemoteResult<()> {
    let changed = conn
        .execute(
            "UPDATE remote_entries SET
                name = COALESCE(?, name),
                category = COALESCE(?, category),
                timestamp = COALESCE(?, timestamp),
                magnitude = COALESCE(?, magnitude),
                deleted_at = CASE WHEN ? THEN NULL ELSE deleted_at END
             WHERE id = ?",
            libsql::params![
                optional_text(patch.name.clone()),
                optional_text(patch.category.map(|c| c.as_str().to_string())),
                optional_text(patch.timestamp.map(format_time)),
                patch.magnitude.map_or(Value::Null, Value::Real),
                i64::from(patch.restore),
                id.as_str(),
            ],
        )
        .await?;

    if changed == 0 {
        return Err(RemoteError::NotFound(id.to_string()));
    }
    Ok(())
}

async fn delete_entry(conn: &Connection, id: &EntryId, at: DateTime<Utc>) -> RemoteResult<()> {
    let changed = conn
        .execute(
            "UPDATE remote_entries SET deleted_at = COALESCE(deleted_at, ?) WHERE id = ?",
            libsql::params![format_time(at), id.as_str()],
        )
        .await?;

    if changed == 0 {
        return Err(RemoteError::NotFound(id.to_string()));
    }
    Ok(())
}

fn parse_entry(row: &libsql::Row) -> RemoteResult<Entry> {
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let category: String = row.get(3)?;
    let timestamp: String = row.get(4)?;
    let magnitude: f64 = row.get(5)?;
    let deleted_at: Option<String> = row.get(6)?;

    let id = id.parse::<EntryId>().map_err(RemoteError::Rejected)?;
    let category = category.parse::<Category>().map_err(RemoteError::Rejected)?;
    let draft = EntryDraft::new(name, category, parse_time(&timestamp)?, magnitude);

    let mut entry = Entry::from_draft(id, draft, owner_id);
    if let Some(at) = deleted_at {
        entry.mark_deleted(parse_time(&at)?);
    }
    entry.validate().map_err(RemoteError::Rejected)?;
    Ok(entry)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(raw: &str) -> RemoteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| RemoteError::Rejected(format!("invalid timestamp '{raw}': {e}")))
}

fn optional_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}
