//! Process configuration for the server binary.
//!
//! Layered: built-in defaults, then an optional TOML file, then `DAL_*`
//! environment variables, then command-line flags (applied in `main`).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dal_coordination::{HealthCheckConfig, RetryPolicy};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Configuration for `dal-server serve` and `dal-server ledger`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the orchestrator API
    pub bind: SocketAddr,
    /// Listen address of the ledger service
    pub ledger_bind: SocketAddr,
    /// Remote ledger service; `None` embeds an in-memory ledger
    pub ledger_url: Option<String>,
    pub ledger_timeout_ms: u64,
    /// Entries per sealed block
    pub ledger_block_size: usize,
    /// How often pending entries are sealed regardless of block size
    pub ledger_block_interval_ms: u64,
    pub health_interval_secs: u64,
    /// Budget for one health probe attempt
    pub health_timeout_ms: u64,
    /// Backoff between failed probe attempts within one round
    pub health_retry: RetryPolicy,
    pub voting_sweep_secs: u64,
    /// Backoff for ledger appends
    pub retry: RetryPolicy,
    /// Extra services to probe: name to health URL
    pub probe_urls: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            ledger_bind: SocketAddr::from(([0, 0, 0, 0], 8100)),
            ledger_url: None,
            ledger_timeout_ms: 5_000,
            ledger_block_size: dal_coordination::ledger::DEFAULT_BLOCK_SIZE,
            ledger_block_interval_ms: 2_000,
            health_interval_secs: 30,
            health_timeout_ms: 5_000,
            health_retry: HealthCheckConfig::default().retry,
            voting_sweep_secs: 30,
            retry: RetryPolicy::default(),
            probe_urls: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `path` (if given) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ServerConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ServerConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ServerConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ServerConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override fields from `DAL_*` variables returned by `lookup`
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ServerConfigError> {
        if let Some(value) = lookup("DAL_BIND") {
            self.bind = parse_env("DAL_BIND", value)?;
        }
        if let Some(value) = lookup("DAL_LEDGER_BIND") {
            self.ledger_bind = parse_env("DAL_LEDGER_BIND", value)?;
        }
        if let Some(value) = lookup("DAL_LEDGER_URL") {
            self.ledger_url = Some(value).filter(|url| !url.is_empty());
        }
        if let Some(value) = lookup("DAL_LEDGER_BLOCK_SIZE") {
            self.ledger_block_size = parse_env("DAL_LEDGER_BLOCK_SIZE", value)?;
        }
        if let Some(value) = lookup("DAL_LEDGER_BLOCK_INTERVAL_MS") {
            self.ledger_block_interval_ms = parse_env("DAL_LEDGER_BLOCK_INTERVAL_MS", value)?;
        }
        if let Some(value) = lookup("DAL_HEALTH_INTERVAL_SECS") {
            self.health_interval_secs = parse_env("DAL_HEALTH_INTERVAL_SECS", value)?;
        }
        if let Some(value) = lookup("DAL_HEALTH_TIMEOUT_MS") {
            self.health_timeout_ms = parse_env("DAL_HEALTH_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("DAL_HEALTH_MAX_RETRIES") {
            self.health_retry.max_retries = parse_env("DAL_HEALTH_MAX_RETRIES", value)?;
        }
        if let Some(value) = lookup("DAL_HEALTH_RETRY_BACKOFF_MS") {
            self.health_retry.initial_backoff_ms =
                parse_env("DAL_HEALTH_RETRY_BACKOFF_MS", value)?;
        }
        if let Some(value) = lookup("DAL_VOTING_SWEEP_SECS") {
            self.voting_sweep_secs = parse_env("DAL_VOTING_SWEEP_SECS", value)?;
        }
        Ok(())
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.ledger_block_interval_ms.max(1))
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    /// Monitor settings built from the `health_*` fields
    pub fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            probe_timeout: Duration::from_millis(self.health_timeout_ms.max(1)),
            retry: self.health_retry.clone(),
            interval: self.health_interval(),
        }
    }

    pub fn voting_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.voting_sweep_secs.max(1))
    }
}

fn parse_env<T: std::str::FromStr>(
    name: &'static str,
    value: String,
) -> Result<T, ServerConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ServerConfigError::InvalidEnv { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind.port(), 8000);
        assert!(config.ledger_url.is_none());
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_toml_overrides_some_fields() {
        let config = ServerConfig::from_toml(
            r#"
bind = "127.0.0.1:9000"
ledger_block_size = 8

[probe_urls]
model_service = "http://model:9000/health"

[retry]
max_retries = 5
initial_backoff_ms = 10
backoff_multiplier = 3.0
max_backoff_ms = 100
"#,
        )
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.ledger_block_size, 8);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.probe_urls["model_service"], "http://model:9000/health");
        assert_eq!(config.voting_sweep_secs, 30);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = ServerConfig::from_toml("ledger_block_size = 8").unwrap();
        config
            .apply_env(env(&[
                ("DAL_LEDGER_BLOCK_SIZE", "2"),
                ("DAL_LEDGER_URL", "http://ledger:8100"),
                ("DAL_VOTING_SWEEP_SECS", "5"),
            ]))
            .unwrap();
        assert_eq!(config.ledger_block_size, 2);
        assert_eq!(config.ledger_url.as_deref(), Some("http://ledger:8100"));
        assert_eq!(config.voting_sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_health_settings_come_from_config() {
        let mut config = ServerConfig::from_toml(
            r#"
health_timeout_ms = 250

[health_retry]
max_retries = 1
initial_backoff_ms = 50
backoff_multiplier = 2.0
max_backoff_ms = 400
"#,
        )
        .unwrap();
        config
            .apply_env(env(&[
                ("DAL_HEALTH_MAX_RETRIES", "4"),
                ("DAL_HEALTH_RETRY_BACKOFF_MS", "20"),
                ("DAL_HEALTH_INTERVAL_SECS", "7"),
            ]))
            .unwrap();

        let health = config.health_check();
        assert_eq!(health.probe_timeout, Duration::from_millis(250));
        assert_eq!(health.retry.max_retries, 4);
        assert_eq!(health.retry.initial_backoff_ms, 20);
        assert_eq!(health.retry.max_backoff_ms, 400);
        assert_eq!(health.interval, Duration::from_secs(7));
    }

    #[test]
    fn test_health_defaults_ignore_process_env() {
        // Default values are constants; only ServerConfig::apply_env reads DAL_* variables
        let a = HealthCheckConfig::default();
        let b = ServerConfig::default().health_check();
        assert_eq!(a.probe_timeout, b.probe_timeout);
        assert_eq!(a.retry, b.retry);
        assert_eq!(a.interval, b.interval);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env(env(&[("DAL_HEALTH_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ServerConfigError::InvalidEnv { name: "DAL_HEALTH_INTERVAL_SECS", .. }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dal.toml");
        std::fs::write(&path, "ledger_url = \"http://ledger:8100\"\nhealth_interval_secs = 10\n")
            .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.ledger_url.as_deref(), Some("http://ledger:8100"));
        assert_eq!(config.health_interval(), Duration::from_secs(10));

        std::fs::write(&path, "health_interval_secs = \"often\"").unwrap();
        let err = ServerConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ServerConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::from_file(Path::new("/nonexistent/dal.toml")).unwrap_err();
        assert!(matches!(err, ServerConfigError::Read { .. }));
    }
}
