use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Settings directory (defaults to ~/.panelpilot)
    pub settings_dir: PathBuf,
    /// SQLite database for credentials, sessions and the audit log
    pub db_path: PathBuf,
    /// Screenshot sampling interval in milliseconds
    pub screenshot_interval_ms: u64,
    /// Bound for a single browser interaction (navigate, wait, fill)
    pub step_timeout_ms: u64,
    /// Bound for a full resource cleanup sweep
    pub cleanup_timeout_ms: u64,
    /// How long a persisted login session stays valid
    pub session_ttl_mins: u64,
    /// Retention window for terminal job records
    pub job_retention_mins: u64,
    /// Run Chrome headless
    pub headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let settings_dir = home_dir.join(".panelpilot");
        Self {
            db_path: settings_dir.join("panelpilot.db"),
            settings_dir,
            screenshot_interval_ms: 500,
            step_timeout_ms: 5_000,
            cleanup_timeout_ms: 10_000,
            session_ttl_mins: 12 * 60,
            job_retention_mins: 24 * 60,
            headless: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home_dir.join(".panelpilot").join("config.toml")
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let config_path = if let Some(p) = path {
            p
        } else {
            self.settings_dir.join("config.toml")
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn screenshot_interval(&self) -> Duration {
        Duration::from_millis(self.screenshot_interval_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_mins * 60)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_mins * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.screenshot_interval(), Duration::from_millis(500));
        assert!(config.headless);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.step_timeout_ms = 3_000;
        config.save(Some(path.clone())).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.step_timeout_ms, 3_000);
    }
}
