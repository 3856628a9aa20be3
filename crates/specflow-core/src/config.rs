use crate::error::{Result, SpecflowError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// MonitoringConfig
// ---------------------------------------------------------------------------

/// Upper bound for `history_retention_days`, about a century.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Re-scan markdown task files whenever the cache is stale.
    #[serde(default = "default_true")]
    pub auto_discovery: bool,
    #[serde(default = "default_retention_days")]
    pub history_retention_days: u32,
    #[serde(default = "default_max_tasks")]
    pub max_tasks_per_feature: usize,
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    90
}

fn default_max_tasks() -> usize {
    1000
}

fn default_max_backups() -> usize {
    10
}

fn default_update_interval() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    300
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            auto_discovery: default_true(),
            history_retention_days: default_retention_days(),
            max_tasks_per_feature: default_max_tasks(),
            backup_enabled: default_true(),
            max_backups: default_max_backups(),
            update_interval_seconds: default_update_interval(),
            cache_enabled: default_true(),
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

impl MonitoringConfig {
    /// How long a cached task list stays fresh. `None` disables caching.
    pub fn cache_ttl(&self) -> Option<Duration> {
        if !self.cache_enabled {
            return None;
        }
        let secs = self.update_interval_seconds.min(self.cache_ttl_seconds);
        if secs == 0 {
            return None;
        }
        Some(Duration::from_secs(secs))
    }

    /// Number of backups to keep per resource, zero when backups are off.
    pub fn backup_limit(&self) -> usize {
        if self.backup_enabled {
            self.max_backups
        } else {
            0
        }
    }

    /// Set a single option from its string form, as used by `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value.parse().map_err(|_| {
                SpecflowError::Configuration(format!("invalid value '{value}' for {key}"))
            })
        }
        match key {
            "auto_discovery" => self.auto_discovery = parse(key, value)?,
            "history_retention_days" => self.history_retention_days = parse(key, value)?,
            "max_tasks_per_feature" => self.max_tasks_per_feature = parse(key, value)?,
            "backup_enabled" => self.backup_enabled = parse(key, value)?,
            "max_backups" => self.max_backups = parse(key, value)?,
            "update_interval_seconds" => self.update_interval_seconds = parse(key, value)?,
            "cache_enabled" => self.cache_enabled = parse(key, value)?,
            "cache_ttl_seconds" => self.cache_ttl_seconds = parse(key, value)?,
            _ => {
                return Err(SpecflowError::Configuration(format!(
                    "unknown option '{key}'"
                )))
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.history_retention_days == 0 {
            error("history_retention_days must be at least 1".to_string());
        } else if self.history_retention_days > MAX_RETENTION_DAYS {
            error(format!(
                "history_retention_days={} exceeds the maximum of {MAX_RETENTION_DAYS}",
                self.history_retention_days
            ));
        }
        if self.max_tasks_per_feature == 0 {
            error("max_tasks_per_feature must be at least 1".to_string());
        }
        if self.backup_enabled && self.max_backups == 0 {
            error("max_backups must be at least 1 when backup_enabled is true".to_string());
        }

        if self.cache_enabled && self.cache_ttl_seconds > 3600 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "cache_ttl_seconds={} (>3600) lets task lists go stale for over an hour",
                    self.cache_ttl_seconds
                ),
            });
        }
        if self.max_backups > 100 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("max_backups={} (>100 is unusual)", self.max_backups),
            });
        }

        warnings
    }

    /// Fail with `Configuration` if any validation result is an error.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SpecflowError::Configuration(errors.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
