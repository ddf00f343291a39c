//! Configuration loading and management
//!
//! Handles parsing of `tasksync.toml` in the data directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::view::{SortDirection, SortKey, StatusFilter, ViewState};

pub const CONFIG_FILE: &str = "tasksync.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default owner when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Sync behaviour
    #[serde(default)]
    pub sync: SyncConfig,

    /// Default view state for listings
    #[serde(default)]
    pub view: ViewConfig,
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Apply changes locally before the service confirms them
    #[serde(default = "default_true")]
    pub optimistic: bool,

    /// Give up on a service request after this long
    #[serde(default = "default_mutation_timeout")]
    pub mutation_timeout: String,

    /// Re-read everything after the push channel reconnects
    #[serde(default = "default_true")]
    pub reconcile_on_resubscribe: bool,

    /// Also re-read everything periodically while connected (e.g. "5m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_interval: Option<String>,

    /// Resubscribe backoff
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial")]
    pub initial: String,

    #[serde(default = "default_backoff_max")]
    pub max: String,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

/// View configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default = "default_sort")]
    pub sort: String,

    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_true() -> bool {
    true
}

fn default_mutation_timeout() -> String {
    "10s".to_string()
}

fn default_backoff_initial() -> String {
    "250ms".to_string()
}

fn default_backoff_max() -> String {
    "30s".to_string()
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_filter() -> String {
    "all".to_string()
}

fn default_sort() -> String {
    "created".to_string()
}

fn default_direction() -> String {
    "desc".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            optimistic: true,
            mutation_timeout: default_mutation_timeout(),
            reconcile_on_resubscribe: true,
            reconcile_interval: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: default_backoff_initial(),
            max: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            sort: default_sort(),
            direction: default_direction(),
        }
    }
}

/// Parse a duration string like `250ms`, `10s`, `5m`, `2h`, `1d` or `1w`.
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, "s"),
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {}", num_str)))?;

    let seconds = |factor: u64| Duration::from_secs(num.saturating_mul(factor));
    let duration = match unit.to_lowercase().as_str() {
        "ms" | "msec" | "millis" => Duration::from_millis(num),
        "s" | "sec" | "second" | "seconds" => seconds(1),
        "m" | "min" | "minute" | "minutes" => seconds(60),
        "h" | "hr" | "hour" | "hours" => seconds(60 * 60),
        "d" | "day" | "days" => seconds(24 * 60 * 60),
        "w" | "week" | "weeks" => seconds(7 * 24 * 60 * 60),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{}'. Expected: ms, s, m, h, d, w",
                unit
            )));
        }
    };

    Ok(duration)
}

impl SyncConfig {
    pub fn mutation_timeout(&self) -> Result<Duration> {
        config_duration(&self.mutation_timeout, "sync.mutation_timeout")
    }

    pub fn reconcile_interval(&self) -> Result<Option<Duration>> {
        self.reconcile_interval
            .as_deref()
            .map(|raw| config_duration(raw, "sync.reconcile_interval"))
            .transpose()
    }

    fn validate(&self) -> Result<()> {
        if self.mutation_timeout()?.is_zero() {
            return Err(Error::InvalidConfig(
                "sync.mutation_timeout must be > 0".to_string(),
            ));
        }
        if let Some(interval) = self.reconcile_interval()? {
            if interval.is_zero() {
                return Err(Error::InvalidConfig(
                    "sync.reconcile_interval must be > 0 when set".to_string(),
                ));
            }
        }
        self.backoff.validate()
    }
}

impl BackoffConfig {
    pub fn initial(&self) -> Result<Duration> {
        config_duration(&self.initial, "sync.backoff.initial")
    }

    pub fn max(&self) -> Result<Duration> {
        config_duration(&self.max, "sync.backoff.max")
    }

    fn validate(&self) -> Result<()> {
        let initial = self.initial()?;
        let max = self.max()?;
        if initial.is_zero() {
            return Err(Error::InvalidConfig(
                "sync.backoff.initial must be > 0".to_string(),
            ));
        }
        if max < initial {
            return Err(Error::InvalidConfig(
                "sync.backoff.max must be >= sync.backoff.initial".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "sync.backoff.multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ViewConfig {
    /// Starting view state for listings.
    pub fn view_state(&self) -> Result<ViewState> {
        let filter: StatusFilter = self
            .filter
            .parse()
            .map_err(|err| Error::InvalidConfig(format!("view.filter: {err}")))?;
        let sort: SortKey = self
            .sort
            .parse()
            .map_err(|err| Error::InvalidConfig(format!("view.sort: {err}")))?;
        let direction: SortDirection = self
            .direction
            .parse()
            .map_err(|err| Error::InvalidConfig(format!("view.direction: {err}")))?;
        Ok(ViewState {
            filter,
            sort,
            direction,
            search: String::new(),
        })
    }
}

fn config_duration(raw: &str, field: &str) -> Result<Duration> {
    parse_duration(raw).map_err(|err| Error::InvalidConfig(format!("{field}: {err}")))
}

impl Config {
    /// Load configuration from a `tasksync.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a data directory, or return defaults when the file is missing
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = Self::path_in(dir);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if let Some(owner) = &self.owner {
            if owner.trim().is_empty() {
                return Err(Error::InvalidConfig("owner cannot be empty".to_string()));
            }
        }
        self.sync.validate()?;
        self.view.view_state()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert!(cfg.owner.is_none());
        assert!(cfg.sync.optimistic);
        assert_eq!(cfg.sync.mutation_timeout, "10s");
        assert!(cfg.sync.reconcile_on_resubscribe);
        assert!(cfg.sync.reconcile_interval.is_none());
        assert_eq!(cfg.sync.backoff.initial, "250ms");
        assert_eq!(cfg.sync.backoff.max, "30s");
        assert_eq!(cfg.sync.backoff.multiplier, 2.0);
        assert_eq!(cfg.view.filter, "all");
        assert_eq!(cfg.view.sort, "created");
        assert_eq!(cfg.view.direction, "desc");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
owner = "alice"

[sync]
optimistic = false
mutation_timeout = "3s"
reconcile_on_resubscribe = false
reconcile_interval = "5m"

[sync.backoff]
initial = "100ms"
max = "10s"
multiplier = 1.5

[view]
filter = "active"
sort = "title"
direction = "asc"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.owner.as_deref(), Some("alice"));
        assert!(!cfg.sync.optimistic);
        assert_eq!(cfg.sync.mutation_timeout().expect("timeout"), Duration::from_secs(3));
        assert!(!cfg.sync.reconcile_on_resubscribe);
        assert_eq!(
            cfg.sync.reconcile_interval().expect("interval"),
            Some(Duration::from_secs(300))
        );
        assert_eq!(cfg.sync.backoff.initial().expect("initial"), Duration::from_millis(100));
        assert_eq!(cfg.sync.backoff.multiplier, 1.5);
        let view = cfg.view.view_state().expect("view");
        assert_eq!(view.filter, StatusFilter::Active);
        assert_eq!(view.sort, SortKey::Title);
        assert_eq!(view.direction, SortDirection::Asc);
    }

    #[test]
    fn invalid_backoff_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[sync.backoff]
initial = "10s"
max = "1s"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_view_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[view]\nfilter = \"someday\"").expect("write config");
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn load_from_dir_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_dir(dir.path()).expect("defaults");
        assert!(cfg.owner.is_none());
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("mutation_timeout = \"10s\""));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms").expect("ms"), Duration::from_millis(250));
        assert_eq!(parse_duration("10").expect("bare"), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").expect("m"), Duration::from_secs(120));
        assert_eq!(parse_duration("1d").expect("d"), Duration::from_secs(86_400));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5y").is_err());
        assert!(parse_duration("ms").is_err());
    }
}
