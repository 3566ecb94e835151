//! Entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix reserved for locally generated, not-yet-confirmed entry ids.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Identifier of an entry.
///
/// Either durable (assigned by the remote store) or provisional (generated
/// locally while offline, always starting with [`TEMP_ID_PREFIX`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Generate a provisional id. UUID v7 keeps temp ids time-sortable.
    #[must_use]
    pub fn temp() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Generate a durable id the way remote gateways in this crate do.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Whether this id was generated locally and never confirmed remotely
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            Err("entry id must not be empty".to_string())
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }
}

/// Enumerated entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl Category {
    pub const ALL: [Self; 4] = [Self::Breakfast, Self::Lunch, Self::Dinner, Self::Snack];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// Fields supplied by the user when creating an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub name: String,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub magnitude: f64,
}

impl EntryDraft {
    pub fn new(
        name: impl Into<String>,
        category: Category,
        timestamp: DateTime<Utc>,
        magnitude: f64,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            timestamp,
            magnitude,
        }
    }

    /// Check field constraints; trims the name in place.
    pub fn validate(&mut self) -> Result<(), String> {
        self.name = self.name.trim().to_string();
        validate_name(&self.name)?;
        validate_magnitude(self.magnitude)
    }
}

/// Partial update of the user-editable fields of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    /// Clear the deletion mark
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restore: bool,
}

impl EntryPatch {
    /// A patch carrying every editable field of `entry`.
    #[must_use]
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            name: Some(entry.name.clone()),
            category: Some(entry.category),
            timestamp: Some(entry.timestamp),
            magnitude: Some(entry.magnitude),
            restore: false,
        }
    }

    /// A patch that only takes the entry out of the trash.
    #[must_use]
    pub fn restoring() -> Self {
        Self {
            restore: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.timestamp.is_none()
            && self.magnitude.is_none()
            && !self.restore
    }

    pub fn validate(&mut self) -> Result<(), String> {
        if let Some(name) = self.name.as_mut() {
            *name = name.trim().to_string();
            validate_name(name)?;
        }
        if let Some(magnitude) = self.magnitude {
            validate_magnitude(magnitude)?;
        }
        Ok(())
    }
}

/// A user-owned record.
///
/// Deletion state is held as a single `deleted_at` so an entry can never be
/// flagged deleted without a deletion time (or the other way round).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EntryRecord", try_from = "EntryRecord")]
pub struct Entry {
    pub id: EntryId,
    pub name: String,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub magnitude: f64,
    pub owner_id: String,
    deleted_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Build a live entry from a validated draft.
    #[must_use]
    pub fn from_draft(id: EntryId, draft: EntryDraft, owner_id: impl Into<String>) -> Self {
        Self {
            id,
            name: draft.name,
            category: draft.category,
            timestamp: draft.timestamp,
            magnitude: draft.magnitude,
            owner_id: owner_id.into(),
            deleted_at: None,
        }
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub const fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Soft delete. Keeps the first deletion time if already deleted.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(at);
        }
    }

    /// Take the entry out of the trash.
    pub fn restore(&mut self) {
        self.deleted_at = None;
    }

    pub fn apply_patch(&mut self, patch: &EntryPatch) {
        if let Some(name) = &patch.name {
            self.name.clone_from(name);
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(timestamp) = patch.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(magnitude) = patch.magnitude {
            self.magnitude = magnitude;
        }
        if patch.restore {
            self.restore();
        }
    }

    /// Full-field content equality: `(name, category, timestamp, magnitude, owner)`.
    #[must_use]
    #[allow(clippy::float_cmp)] // exact equality is the duplicate rule
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.category == other.category
            && self.timestamp == other.timestamp
            && self.magnitude == other.magnitude
            && self.owner_id == other.owner_id
    }

    /// Same content and the same deletion state.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.same_content(other) && self.is_deleted() == other.is_deleted()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("entry id must not be empty".to_string());
        }
        validate_name(&self.name)?;
        validate_magnitude(self.magnitude)
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        Err("entry name must not be empty".to_string())
    } else {
        Ok(())
    }
}

fn validate_magnitude(magnitude: f64) -> Result<(), String> {
    if magnitude.is_finite() && magnitude >= 0.0 {
        Ok(())
    } else {
        Err(format!("magnitude must be a non-negative number, got {magnitude}"))
    }
}

/// Serialized shape of an [`Entry`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRecord {
    id: EntryId,
    name: String,
    category: Category,
    timestamp: DateTime<Utc>,
    magnitude: f64,
    owner_id: String,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

impl From<Entry> for EntryRecord {
    fn from(entry: Entry) -> Self {
        Self {
            is_deleted: entry.is_deleted(),
            id: entry.id,
            name: entry.name,
            category: entry.category,
            timestamp: entry.timestamp,
            magnitude: entry.magnitude,
            owner_id: entry.owner_id,
            deleted_at: entry.deleted_at,
        }
    }
}

impl TryFrom<EntryRecord> for Entry {
    type Error = String;

    fn try_from(record: EntryRecord) -> Result<Self, Self::Error> {
        if record.is_deleted != record.deleted_at.is_some() {
            return Err(format!(
                "entry {} has is_deleted={} but deleted_at={:?}",
                record.id, record.is_deleted, record.deleted_at
            ));
        }

        let entry = Self {
            id: record.id,
            name: record.name,
            category: record.category,
            timestamp: record.timestamp,
            magnitude: record.magnitude,
            owner_id: record.owner_id,
            deleted_at: record.deleted_at,
        };
        entry.validate()?;
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    pub fn entry(id: &str, name: &str, timestamp: DateTime<Utc>, magnitude: f64) -> Entry {
        Entry::from_draft(
            id.parse().unwrap(),
            EntryDraft::new(name, Category::Snack, timestamp, magnitude),
            "u1",
        )
    }

    #[test]
    fn test_temp_ids_are_distinguishable() {
        let temp = EntryId::temp();
        let durable = EntryId::generate();
        assert!(temp.is_temp());
        assert!(!durable.is_temp());
        assert_ne!(EntryId::temp(), temp);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Lunch".parse::<Category>().unwrap(), Category::Lunch);
        assert!("brunch".parse::<Category>().is_err());
    }

    #[test]
    fn test_mark_deleted_sets_both_fields() {
        let mut coffee = entry("e1", "Coffee", at(8, 0), 50.0);
        assert!(!coffee.is_deleted());
        coffee.mark_deleted(at(9, 0));
        assert!(coffee.is_deleted());
        assert_eq!(coffee.deleted_at(), Some(at(9, 0)));

        coffee.mark_deleted(at(10, 0));
        assert_eq!(coffee.deleted_at(), Some(at(9, 0)));
    }

    #[test]
    fn test_serialized_form_carries_deletion_flag() {
        let mut coffee = entry("e1", "Coffee", at(8, 0), 50.0);
        coffee.mark_deleted(at(9, 0));

        let value = serde_json::to_value(&coffee).unwrap();
        assert_eq!(value["is_deleted"], true);
        assert_eq!(value["timestamp"], "2026-03-14T08:00:00Z");

        let parsed: Entry = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, coffee);
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_deletion() {
        let payload = r#"{
            "id": "e1", "name": "Coffee", "category": "snack",
            "timestamp": "2026-03-14T08:00:00Z", "magnitude": 50,
            "owner_id": "u1", "is_deleted": true, "deleted_at": null
        }"#;
        assert!(serde_json::from_str::<Entry>(payload).is_err());
    }

    #[test]
    fn test_draft_validation() {
        let mut draft = EntryDraft::new("  Water ", Category::Snack, at(7, 0), 0.0);
        assert!(draft.validate().is_ok());
        assert_eq!(draft.name, "Water");

        let mut blank = EntryDraft::new("   ", Category::Snack, at(7, 0), 1.0);
        assert!(blank.validate().is_err());

        let mut negative = EntryDraft::new("Tea", Category::Snack, at(7, 0), -1.0);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_same_content_ignores_id() {
        let a = entry("temp_1", "Water", at(7, 0), 0.0);
        let b = entry("remote-1", "Water", at(7, 0), 0.0);
        assert!(a.same_content(&b));

        let c = entry("remote-2", "Water", at(7, 1), 0.0);
        assert!(!a.same_content(&c));
    }

    #[test]
    fn test_apply_patch_only_touches_given_fields() {
        let mut coffee = entry("e1", "Coffee", at(8, 0), 50.0);
        coffee.apply_patch(&EntryPatch {
            magnitude: Some(80.0),
            ..EntryPatch::default()
        });
        assert_eq!(coffee.name, "Coffee");
        assert!((coffee.magnitude - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_restoring_patch_clears_deletion() {
        let mut coffee = entry("e1", "Coffee", at(8, 0), 50.0);
        coffee.mark_deleted(at(9, 0));
        assert!(!EntryPatch::restoring().is_empty());

        coffee.apply_patch(&EntryPatch::restoring());
        assert!(!coffee.is_deleted());
        assert_eq!(coffee.name, "Coffee");
    }
}
