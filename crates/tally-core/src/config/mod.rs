//! Sync engine settings.
//!
//! Settings are read from `tally/sync-settings.json` under the platform
//! config directory, then overridden by `TALLY_*` environment variables,
//! then validated. Every field has a default, so a missing file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const SETTINGS_FILE_NAME: &str = "sync-settings.json";

pub const DEFAULT_BATCH_SIZE: usize = 300;
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Pending operations replayed per atomic remote batch
    pub batch_size: usize,
    /// Background sync period while operations are pending
    pub periodic_interval_secs: u64,
    /// Wait after connectivity returns before syncing
    pub recovery_delay_ms: u64,
    /// How often the scheduler re-checks connectivity
    pub connectivity_poll_secs: u64,
    pub probe_timeout_secs: u64,
    /// URL for the HTTP reachability probe; `None` means always online
    pub probe_url: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            periodic_interval_secs: 300,
            recovery_delay_ms: 2000,
            connectivity_poll_secs: 15,
            probe_timeout_secs: 4,
            probe_url: None,
        }
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tally").join(SETTINGS_FILE_NAME))
}

impl SyncSettings {
    /// Load from the default path and the process environment.
    pub fn load() -> Result<Self> {
        let mut settings = match default_settings_path() {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::default(),
        };
        settings.apply_overrides(std::env::vars())?;
        settings.validate()
    }

    /// Read settings from a JSON file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|error| {
            Error::Config(format!(
                "Failed to parse settings at {}: {error}",
                path.display()
            ))
        })
    }

    /// Apply `TALLY_*` overrides from `(name, value)` pairs.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            match name.as_str() {
                "TALLY_SYNC_BATCH_SIZE" => self.batch_size = parse_var(&name, &value)?,
                "TALLY_SYNC_INTERVAL_SECS" => {
                    self.periodic_interval_secs = parse_var(&name, &value)?;
                }
                "TALLY_RECOVERY_DELAY_MS" => self.recovery_delay_ms = parse_var(&name, &value)?,
                "TALLY_CONNECTIVITY_POLL_SECS" => {
                    self.connectivity_poll_secs = parse_var(&name, &value)?;
                }
                "TALLY_PROBE_TIMEOUT_SECS" => self.probe_timeout_secs = parse_var(&name, &value)?,
                "TALLY_PROBE_URL" => self.probe_url = Some(value),
                _ => {}
            }
        }
        Ok(())
    }

    /// Check ranges and normalize the probe URL.
    pub fn validate(mut self) -> Result<Self> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(Error::Config(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        for (field, value) in [
            ("periodic_interval_secs", self.periodic_interval_secs),
            ("connectivity_poll_secs", self.connectivity_poll_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be greater than zero")));
            }
        }

        self.probe_url = match self.probe_url.take() {
            Some(url) => normalize_http_url(&url)?,
            None => None,
        };
        Ok(self)
    }

    pub const fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub const fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub const fn connectivity_poll(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} has an invalid value '{value}'")))
}

/// Trim a URL and require an http(s) scheme. Blank input yields `None`.
pub fn normalize_http_url(raw: &str) -> Result<Option<String>> {
    let url = raw.trim();
    if url.is_empty() {
        return Ok(None);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Some(url.trim_end_matches('/').to_string()))
    } else {
        Err(Error::Config(format!(
            "'{url}' must include http:// or https://"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempdir().unwrap();
        let settings = SyncSettings::load_from_path(&tmp.path().join("none.json")).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.batch_size, 300);
    }

    #[test]
    fn test_file_values_and_defaults_combine() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"batch_size": 50, "probe_url": "https://example.com/"}"#)
            .unwrap();

        let settings = SyncSettings::load_from_path(&path)
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.periodic_interval_secs, 300);
        assert_eq!(settings.probe_url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"batch": 50}"#).unwrap();

        let error = SyncSettings::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = SyncSettings::default();
        settings
            .apply_overrides(vars(&[
                ("TALLY_SYNC_BATCH_SIZE", "25"),
                ("TALLY_RECOVERY_DELAY_MS", " 10 "),
                ("TALLY_PROBE_URL", "http://localhost:8080"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.recovery_delay(), Duration::from_millis(10));
        assert_eq!(settings.probe_url.as_deref(), Some("http://localhost:8080"));

        assert!(settings
            .apply_overrides(vars(&[("TALLY_SYNC_INTERVAL_SECS", "soon")]))
            .is_err());
    }

    #[test]
    fn test_validate_bounds() {
        let too_big = SyncSettings {
            batch_size: MAX_BATCH_SIZE + 1,
            ..SyncSettings::default()
        };
        assert!(too_big.validate().is_err());

        let zero = SyncSettings {
            batch_size: 0,
            ..SyncSettings::default()
        };
        assert!(zero.validate().is_err());

        let no_poll = SyncSettings {
            connectivity_poll_secs: 0,
            ..SyncSettings::default()
        };
        assert!(no_poll.validate().is_err());

        let bad_url = SyncSettings {
            probe_url: Some("example.com".to_string()),
            ..SyncSettings::default()
        };
        assert!(bad_url.validate().is_err());

        let blank_url = SyncSettings {
            probe_url: Some("   ".to_string()),
            ..SyncSettings::default()
        };
        assert_eq!(blank_url.validate().unwrap().probe_url, None);
    }
}
