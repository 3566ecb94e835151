//! Cached entries for one user

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::kv::KeyValueStore;
use crate::models::{Entry, EntryId, EntryPatch};

use super::{read_json_list, write_json};

/// The user's entry cache, stored as one JSON list.
pub struct RecordStore<'a, K> {
    kv: &'a K,
    key: String,
}

impl<'a, K: KeyValueStore> RecordStore<'a, K> {
    pub(super) const fn new(kv: &'a K, key: String) -> Self {
        Self { kv, key }
    }

    /// A fresh provisional id for an entry created locally.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn generate_temp_id(&self) -> EntryId {
        EntryId::temp()
    }

    /// Every cached entry, deleted ones included.
    pub async fn get_all(&self) -> Result<Vec<Entry>> {
        let (entries, pruned) = read_json_list(self.kv, &self.key, Entry::validate).await?;
        if pruned {
            self.replace_all(&entries).await?;
        }
        Ok(entries)
    }

    pub async fn replace_all(&self, entries: &[Entry]) -> Result<()> {
        write_json(self.kv, &self.key, entries).await
    }

    pub async fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .find(|entry| &entry.id == id))
    }

    /// Live entries with `start <= timestamp <= end`, oldest first.
    pub async fn get_for_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Entry>> {
        let mut entries = self
            .get_all()
            .await?
            .into_iter()
            .filter(|entry| {
                !entry.is_deleted() && entry.timestamp >= start && entry.timestamp <= end
            })
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Soft-deleted entries, most recently deleted first.
    pub async fn list_deleted(&self) -> Result<Vec<Entry>> {
        let mut entries = self
            .get_all()
            .await?
            .into_iter()
            .filter(Entry::is_deleted)
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| b.deleted_at().cmp(&a.deleted_at()));
        Ok(entries)
    }

    /// Insert or replace an entry and return the stored version.
    ///
    /// An entry with the same id is replaced. Otherwise, if a live entry
    /// with the same content already exists, the new one is merged into it
    /// and the existing id is kept.
    pub async fn upsert(&self, entry: Entry) -> Result<Entry> {
        let mut entries = self.get_all().await?;

        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry.clone();
            self.replace_all(&entries).await?;
            return Ok(entry);
        }

        if !entry.is_deleted() {
            if let Some(existing) = entries
                .iter()
                .find(|e| !e.is_deleted() && e.same_content(&entry))
            {
                tracing::debug!(
                    "Entry {} matches cached entry {}, keeping existing id",
                    entry.id,
                    existing.id
                );
                return Ok(existing.clone());
            }
        }

        entries.push(entry.clone());
        self.replace_all(&entries).await?;
        Ok(entry)
    }

    /// Apply a patch to a live entry.
    pub async fn update_fields(&self, id: &EntryId, patch: &EntryPatch) -> Result<Entry> {
        let mut entries = self.get_all().await?;
        let entry = entries
            .iter_mut()
            .find(|e| &e.id == id && !e.is_deleted())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        entry.apply_patch(patch);
        let updated = entry.clone();
        self.replace_all(&entries).await?;
        Ok(updated)
    }

    /// Soft delete an entry. Deleting an already deleted entry keeps its
    /// original deletion time.
    pub async fn mark_deleted(&self, id: &EntryId, at: DateTime<Utc>) -> Result<Entry> {
        let mut entries = self.get_all().await?;
        let entry = entries
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        entry.mark_deleted(at);
        let deleted = entry.clone();
        self.replace_all(&entries).await?;
        Ok(deleted)
    }

    /// Take a soft-deleted entry out of the trash.
    pub async fn restore(&self, id: &EntryId) -> Result<Entry> {
        let mut entries = self.get_all().await?;
        let entry = entries
            .iter_mut()
            .find(|e| &e.id == id && e.is_deleted())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        entry.restore();
        let restored = entry.clone();
        self.replace_all(&entries).await?;
        Ok(restored)
    }

    /// Remove an entry from the cache entirely. Returns whether it existed.
    pub async fn purge(&self, id: &EntryId) -> Result<bool> {
        let mut entries = self.get_all().await?;
        let before = entries.len();
        entries.retain(|e| &e.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.replace_all(&entries).await?;
        Ok(true)
    }

    /// Rename a provisional id to its durable id.
    ///
    /// When the durable id is already cached the provisional record is
    /// dropped instead, so the entry never appears twice.
    pub async fn remap_id(&self, from: &EntryId, to: &EntryId) -> Result<()> {
        let mut entries = self.get_all().await?;
        if !entries.iter().any(|e| &e.id == from) {
            return Ok(());
        }

        if entries.iter().any(|e| &e.id == to) {
            entries.retain(|e| &e.id != from);
        } else if let Some(entry) = entries.iter_mut().find(|e| &e.id == from) {
            entry.id = to.clone();
        }
        self.replace_all(&entries).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.kv.remove(&self.key).await
    }
}
