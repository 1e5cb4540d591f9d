//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::graph::metrics::MetricsConfig;
use crate::lock::{BackoffPolicy, LockConfig};
use crate::queue::QueueConfig;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "KGSYNC_CONFIG_DIR";

/// Environment variable holding the store password
pub const STORE_PASSWORD_ENV: &str = "KGSYNC_STORE_PASSWORD";

/// kgsync configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub lock: LockSettings,
    pub queue: QueueSettings,
    pub graph: GraphSettings,
}

/// Which store backend the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Memory,
    Redis,
}

impl StoreBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for StoreBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StoreBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(anyhow!(
                "Invalid store backend: {}. Valid options: memory, redis",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    /// `host:port` of the store server
    pub host: String,
    pub db: u32,
    #[serde(skip)]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Memory,
            host: "localhost:6379".to_string(),
            db: 1,
            password: None,
        }
    }
}

impl StoreConfig {
    /// Password from the environment; never read from the config file
    pub fn resolved_password(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;
        Ok(env::var(STORE_PASSWORD_ENV).ok().filter(|p| !p.is_empty()))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.password.is_some() {
            return Err(anyhow!(
                "Store passwords must be provided via {}, not stored in configuration",
                STORE_PASSWORD_ENV
            ));
        }
        Ok(())
    }

    /// Connection URL for the store, with the password (if any) redacted
    pub fn redacted_url(&self) -> String {
        format!("redis://{}/{}", self.host, self.db)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub ttl_secs: u64,
    pub acquire_timeout_secs: u64,
    pub min_retry_interval_ms: u64,
    pub retry_divisor: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            acquire_timeout_secs: 10,
            min_retry_interval_ms: 100,
            retry_divisor: 10,
        }
    }
}

impl LockSettings {
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default()
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_timeout(Duration::from_secs(self.acquire_timeout_secs))
            .with_backoff(BackoffPolicy::new(
                Duration::from_millis(self.min_retry_interval_ms),
                self.retry_divisor,
            ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub block_ms: u64,
    pub produce_attempts: u32,
    pub pending_scan_max: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            block_ms: 10_000,
            produce_attempts: 3,
            pending_scan_max: 10_000_000_000_000,
        }
    }
}

impl QueueSettings {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            block: Duration::from_millis(self.block_ms),
            produce_attempts: self.produce_attempts,
            pending_scan_max: self.pending_scan_max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub n_hops: usize,
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            n_hops: 2,
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

impl GraphSettings {
    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            n_hops: self.n_hops,
            damping: self.damping,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

const KEYS: &[&str] = &[
    "store.backend",
    "store.host",
    "store.db",
    "store.password",
    "lock.ttl_secs",
    "lock.acquire_timeout_secs",
    "lock.min_retry_interval_ms",
    "lock.retry_divisor",
    "queue.block_ms",
    "queue.produce_attempts",
    "queue.pending_scan_max",
    "graph.n_hops",
    "graph.damping",
    "graph.max_iterations",
    "graph.tolerance",
];

fn parse<T: FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("kgsync")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file, or defaults if absent
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create config directory: {}", dir.display())
            })?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.store.enforce_env_only()?;
        if self.lock.ttl_secs == 0 {
            return Err(anyhow!("lock.ttl_secs must be positive"));
        }
        if self.lock.retry_divisor == 0 {
            return Err(anyhow!("lock.retry_divisor must be positive"));
        }
        if self.queue.produce_attempts == 0 {
            return Err(anyhow!("queue.produce_attempts must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.graph.damping) {
            return Err(anyhow!("graph.damping must be in [0.0, 1.0)"));
        }
        if self.graph.tolerance <= 0.0 {
            return Err(anyhow!("graph.tolerance must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "store.backend" => Ok(self.store.backend.to_string()),
            "store.host" => Ok(self.store.host.clone()),
            "store.db" => Ok(self.store.db.to_string()),
            "store.password" => match self.store.resolved_password()? {
                Some(_) => Ok("***".to_string()),
                None => Ok(format!("(not set - use {} env var)", STORE_PASSWORD_ENV)),
            },

            "lock.ttl_secs" => Ok(self.lock.ttl_secs.to_string()),
            "lock.acquire_timeout_secs" => Ok(self.lock.acquire_timeout_secs.to_string()),
            "lock.min_retry_interval_ms" => Ok(self.lock.min_retry_interval_ms.to_string()),
            "lock.retry_divisor" => Ok(self.lock.retry_divisor.to_string()),

            "queue.block_ms" => Ok(self.queue.block_ms.to_string()),
            "queue.produce_attempts" => Ok(self.queue.produce_attempts.to_string()),
            "queue.pending_scan_max" => Ok(self.queue.pending_scan_max.to_string()),

            "graph.n_hops" => Ok(self.graph.n_hops.to_string()),
            "graph.damping" => Ok(self.graph.damping.to_string()),
            "graph.max_iterations" => Ok(self.graph.max_iterations.to_string()),
            "graph.tolerance" => Ok(self.graph.tolerance.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `kgsync config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "store.backend" => self.store.backend = value.parse()?,
            "store.host" => {
                if !value.contains(':') {
                    return Err(anyhow!("store.host must be in host:port form"));
                }
                self.store.host = value.to_string();
            }
            "store.db" => self.store.db = parse(key, value)?,
            "store.password" => {
                return Err(anyhow!(
                    "Store passwords cannot be stored in configuration. Set the {} environment variable instead.",
                    STORE_PASSWORD_ENV
                ));
            }

            "lock.ttl_secs" => self.lock.ttl_secs = parse(key, value)?,
            "lock.acquire_timeout_secs" => self.lock.acquire_timeout_secs = parse(key, value)?,
            "lock.min_retry_interval_ms" => self.lock.min_retry_interval_ms = parse(key, value)?,
            "lock.retry_divisor" => self.lock.retry_divisor = parse(key, value)?,

            "queue.block_ms" => self.queue.block_ms = parse(key, value)?,
            "queue.produce_attempts" => self.queue.produce_attempts = parse(key, value)?,
            "queue.pending_scan_max" => self.queue.pending_scan_max = parse(key, value)?,

            "graph.n_hops" => self.graph.n_hops = parse(key, value)?,
            "graph.damping" => self.graph.damping = parse(key, value)?,
            "graph.max_iterations" => self.graph.max_iterations = parse(key, value)?,
            "graph.tolerance" => self.graph.tolerance = parse(key, value)?,

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `kgsync config list` to see available keys.",
                    key
                ));
            }
        }
        self.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.lock.ttl_secs, 1800);
        assert_eq!(config.lock.acquire_timeout_secs, 10);
        assert_eq!(config.queue.block_ms, 10_000);
        assert_eq!(config.graph.n_hops, 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("store.backend", "redis").unwrap();
        config.set("lock.ttl_secs", "600").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.store.backend, StoreBackendKind::Redis);
        assert_eq!(loaded.lock.lock_config().ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[lock]\nttl_secs = 60\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.lock.ttl_secs, 60);
        assert_eq!(loaded.lock.acquire_timeout_secs, 10);
        assert_eq!(loaded.queue, QueueSettings::default());
    }

    #[test]
    fn test_set_validation() {
        let mut config = Config::default();
        assert!(config.set("store.backend", "postgres").is_err());
        assert!(config.set("store.host", "nohost").is_err());
        assert!(config.set("store.password", "secret").is_err());
        assert!(config.set("graph.damping", "1.5").is_err());
        assert!(config.set("lock.ttl_secs", "soon").is_err());
        assert!(config.set("nope", "1").is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let listed = config.list().unwrap();
        assert_eq!(listed.len(), KEYS.len());
        assert!(listed.iter().any(|(k, v)| k == "graph.n_hops" && v == "2"));
    }
}
