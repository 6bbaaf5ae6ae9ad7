//! agentplane configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use statestore::{DEFAULT_AUTOSAVE_INTERVAL_MS, DEFAULT_HISTORY_LIMIT, StoreOptions};

use crate::agent::AgentConfig;
use crate::bus::DEFAULT_DELIVERY_TIMEOUT_MS;

const LOCAL_CONFIG: &str = ".agentplane.yml";
const REDACTED: &str = "<redacted>";

/// Main agentplane configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR); `--log-level` wins over it
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    pub bus: BusConfig,

    pub state: StateConfig,

    /// Defaults applied to every agent
    pub agent: AgentConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // An explicit path must load
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {:#}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Pull only `log-level` out of the config, before logging is set up
    ///
    /// Never fails; any problem reads as "not set".
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        #[derive(Deserialize)]
        struct LogLevelOnly {
            #[serde(rename = "log-level")]
            log_level: Option<String>,
        }

        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<LogLevelOnly>(&content).ok()?.log_level
    }

    /// `./.agentplane.yml`, then `<config_dir>/agentplane/agentplane.yml`
    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("agentplane").join("agentplane.yml"));
        }
        candidates
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Copy safe to print: API key values are masked, service names kept
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for value in config.agent.security.api_keys.values_mut() {
            *value = REDACTED.to_string();
        }
        config
    }
}

/// Message bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber delivery timeout
    #[serde(rename = "delivery-timeout-ms")]
    pub delivery_timeout_ms: u64,
}

impl BusConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
        }
    }
}

/// State persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding `state-store.json`
    #[serde(rename = "storage-dir")]
    pub storage_dir: PathBuf,

    #[serde(rename = "history-limit")]
    pub history_limit: usize,

    /// Periodic snapshot interval; 0 disables autosave
    #[serde(rename = "autosave-interval-ms")]
    pub autosave_interval_ms: u64,
}

impl StateConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::default()
            .with_history_limit(self.history_limit)
            .with_autosave_interval(Duration::from_millis(self.autosave_interval_ms))
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".agentplane"),
            history_limit: DEFAULT_HISTORY_LIMIT,
            autosave_interval_ms: DEFAULT_AUTOSAVE_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.log_level.is_none());
        assert_eq!(config.bus.delivery_timeout_ms, 5000);
        assert_eq!(config.state.storage_dir, PathBuf::from(".agentplane"));
        assert_eq!(config.state.history_limit, 1000);
        assert_eq!(config.state.autosave_interval_ms, 5000);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: DEBUG
bus:
  delivery-timeout-ms: 250
state:
  storage-dir: /var/lib/agentplane
  history-limit: 50
  autosave-interval-ms: 0
agent:
  resources:
    memory: 1024
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
        assert_eq!(config.bus.delivery_timeout(), Duration::from_millis(250));
        assert_eq!(config.state.storage_dir, PathBuf::from("/var/lib/agentplane"));
        assert_eq!(config.state.history_limit, 50);
        assert_eq!(config.agent.resources.memory, 1024);

        let options = config.state.store_options();
        assert_eq!(options.history_limit, 50);
        assert_eq!(options.autosave_interval, Duration::ZERO);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("state:\n  history-limit: 10\n").unwrap();
        assert_eq!(config.state.history_limit, 10);
        assert_eq!(config.state.autosave_interval_ms, 5000);
        assert_eq!(config.bus.delivery_timeout_ms, 5000);

        let options = config.state.store_options();
        assert_eq!(options.autosave_interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentplane.yml");
        fs::write(&path, "log-level: warn\nbus:\n  delivery-timeout-ms: 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bus.delivery_timeout_ms, 10);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_explicit_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
        assert!(Config::load_log_level(Some(&missing)).is_none());

        let broken = dir.path().join("broken.yml");
        fs::write(&broken, "bus: [not, a, map]\n").unwrap();
        assert!(Config::load(Some(&broken)).is_err());
    }

    #[test]
    fn test_redacted_masks_api_keys() {
        let yaml = "agent:\n  security:\n    api-keys:\n      completion: SECRET_TOKEN_VAR\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.agent.security.api_keys["completion"], "SECRET_TOKEN_VAR");

        let redacted = config.redacted();
        assert_eq!(redacted.agent.security.api_keys["completion"], "<redacted>");
        let printed = serde_yaml::to_string(&redacted).unwrap();
        assert!(!printed.contains("SECRET_TOKEN_VAR"));
        assert!(printed.contains("completion"));
        assert_eq!(redacted.state, config.state);
    }
}
