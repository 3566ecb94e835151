use std::env;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tally_core::clock::SystemClock;
use tally_core::config::SyncSettings;
use tally_core::db::{Database, LibSqlKeyValueStore};
use tally_core::models::{Entry, PendingOperation};
use tally_core::remote::{HttpProbe, LibSqlRemote, ReachabilityProbe, StaticProbe};
use tally_core::store::LocalStore;
use tally_core::sync::SyncEngine;
use tally_core::DataService;

use crate::error::CliError;

const DEFAULT_USER: &str = "local";

pub type CliService = DataService<LibSqlKeyValueStore, LibSqlRemote, CliProbe, SystemClock>;

/// Probe chosen from flags and settings
pub enum CliProbe {
    Static(StaticProbe),
    Http(HttpProbe),
}

impl ReachabilityProbe for CliProbe {
    async fn is_online(&self) -> bool {
        match self {
            Self::Static(probe) => probe.is_online().await,
            Self::Http(probe) => probe.is_online().await,
        }
    }
}

/// Paths and identity shared by every command
#[derive(Debug, Clone)]
pub struct Target {
    pub db_path: PathBuf,
    pub remote_db_path: PathBuf,
    pub user_id: String,
    pub offline: bool,
}

impl Target {
    pub fn resolve(
        db_path: Option<PathBuf>,
        remote_db_path: Option<PathBuf>,
        user: Option<String>,
        offline: bool,
    ) -> Self {
        Self {
            db_path: resolve_db_path(db_path),
            remote_db_path: resolve_remote_db_path(remote_db_path),
            user_id: resolve_user(user),
            offline,
        }
    }
}

pub async fn open_service(target: &Target) -> Result<CliService, CliError> {
    let settings = SyncSettings::load()?;
    open_service_with(target, settings).await
}

pub async fn open_service_with(
    target: &Target,
    settings: SyncSettings,
) -> Result<CliService, CliError> {
    let local = Database::open(&target.db_path).await?;
    let remote = LibSqlRemote::open(&target.remote_db_path).await?;

    let probe = if target.offline {
        CliProbe::Static(StaticProbe::offline())
    } else if let Some(url) = settings.probe_url.as_deref() {
        CliProbe::Http(HttpProbe::new(url, settings.probe_timeout())?)
    } else {
        CliProbe::Static(StaticProbe::online())
    };

    let engine = SyncEngine::new(
        LocalStore::new(LibSqlKeyValueStore::new(local)),
        remote,
        probe,
        SystemClock,
        settings,
    );
    Ok(DataService::new(engine))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| default_data_path("tally.db"))
}

pub fn resolve_remote_db_path(cli_remote_db: Option<PathBuf>) -> PathBuf {
    cli_remote_db
        .or_else(|| env::var_os("TALLY_REMOTE_DB").map(PathBuf::from))
        .unwrap_or_else(|| default_data_path("remote.db"))
}

pub fn resolve_user(cli_user: Option<String>) -> String {
    cli_user
        .or_else(|| env::var("TALLY_USER").ok())
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}

fn default_data_path(file_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join(file_name)
}

pub fn normalize_entry_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyEntryId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find the entry whose id equals `query`, or uniquely starts with it.
pub fn resolve_entry<'a>(query: &str, entries: &'a [Entry]) -> Result<&'a Entry, CliError> {
    let query = normalize_entry_identifier(query)?;
    if let Some(entry) = entries.iter().find(|entry| entry.id.as_str() == query) {
        return Ok(entry);
    }

    let matching = entries
        .iter()
        .filter(|entry| entry.id.as_str().starts_with(&query))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::EntryNotFound(query)),
        [entry] => Ok(entry),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|entry| short_id(entry.id.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousEntryId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn resolve_name(parts: &[String]) -> Result<String, CliError> {
    let name = parts.join(" ").trim().to_string();
    if name.is_empty() {
        Err(CliError::EmptyName)
    } else {
        Ok(name)
    }
}

/// Parse RFC 3339, or `YYYY-MM-DD HH:MM` read as UTC
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>, CliError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CliError::InvalidTime(raw.to_string()))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(raw.to_string()))
}

fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_entry_lines(entries: &[Entry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let id = short_id(entry.id.as_str());
            let when = entry.timestamp.format("%Y-%m-%d %H:%M");
            let category = entry.category.as_str();
            let name = preview(&entry.name, 32);
            format!(
                "{id:<13}  {when}  {category:<9}  {name:<32}  {}",
                entry.magnitude
            )
        })
        .collect()
}

pub fn format_pending_lines(ops: &[PendingOperation]) -> Vec<String> {
    ops.iter()
        .map(|op| {
            let target = short_id(op.target().as_str());
            let name = preview(&op.payload.name, 32);
            format!("{}  {:<6}  {target:<13}  {name}", op.id, op.kind.to_string())
        })
        .collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut truncated = collapsed
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - timestamp).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
