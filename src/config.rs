use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "provider", default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminConfig>,
}

/// One chat-completion endpoint under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub key: String,
    pub display_name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// Model identifier sent in the request body. Falls back to `key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn request_model(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64, // Per-probe watchdog in seconds
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64, // Delay between probe launches within a round
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Ordered subset of provider keys to test (empty = every provider)
    #[serde(default)]
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Trigger interval (e.g., "1h", "30m")
    #[serde(default = "default_schedule_interval")]
    pub interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    /// Per-module log level overrides (e.g., ["hyper=info", "h2=warn"])
    #[serde(default)]
    pub filter: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            stagger_ms: default_stagger_ms(),
            prompt: default_prompt(),
            providers: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dir: default_export_dir(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
            enabled: default_enabled(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: Vec::new(),
            file: None,
        }
    }
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_stagger_ms() -> u64 {
    500
}

fn default_prompt() -> String {
    "Using the current time {now}, write a short humorous poem.".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("results.jsonl")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_enabled() -> bool {
    true
}

fn default_schedule_interval() -> String {
    "1h".to_string()
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_admin_listen() -> String {
    "127.0.0.1:5000".to_string()
}

impl BenchmarkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> anyhow::Result<Duration> {
        Ok(humantime::parse_duration(&self.interval)?)
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Provider keys to test, in launch order.
    pub fn selected_providers(&self) -> Vec<String> {
        if self.benchmark.providers.is_empty() {
            self.providers.iter().map(|p| p.key.clone()).collect()
        } else {
            self.benchmark.providers.clone()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("At least one [[provider]] must be configured");
        }

        let mut keys = HashSet::new();
        for provider in &self.providers {
            if provider.key.trim().is_empty() {
                anyhow::bail!("Provider key must not be empty");
            }
            if provider.url.trim().is_empty() {
                anyhow::bail!("Provider '{}' has an empty url", provider.key);
            }
            if !keys.insert(provider.key.as_str()) {
                anyhow::bail!("Duplicate provider key '{}'", provider.key);
            }
        }

        let mut selected = HashSet::new();
        for key in &self.benchmark.providers {
            if !keys.contains(key.as_str()) {
                anyhow::bail!("benchmark.providers references unknown provider '{}'", key);
            }
            if !selected.insert(key.as_str()) {
                anyhow::bail!("benchmark.providers lists '{}' more than once", key);
            }
        }

        if self.benchmark.timeout == 0 {
            anyhow::bail!("benchmark.timeout must be greater than 0");
        }

        if let Some(schedule) = &self.schedule {
            schedule.interval().map_err(|e| {
                anyhow::anyhow!("Invalid schedule.interval '{}': {}", schedule.interval, e)
            })?;
            if schedule.timeout == Some(0) {
                anyhow::bail!("schedule.timeout must be greater than 0");
            }
        }

        if let Some(admin) = &self.admin
            && admin.listen.parse::<std::net::SocketAddr>().is_err()
        {
            anyhow::bail!("Invalid admin.listen address '{}'", admin.listen);
        }

        if self.runtime.worker_threads == 0 {
            anyhow::bail!("worker_threads must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[provider]]
key = "alpha"
display_name = "Alpha"
url = "http://127.0.0.1:1/v1/chat/completions"
api_key = "sk-alpha"
model = "alpha-large"

[[provider]]
key = "beta"
display_name = "Beta"
url = "http://127.0.0.1:2/v1/chat/completions"
"#;

    #[test]
    fn test_defaults_applied() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.benchmark.timeout, 300);
        assert_eq!(config.benchmark.stagger(), Duration::from_millis(500));
        assert!(config.benchmark.prompt.contains("{now}"));
        assert_eq!(config.store.path, PathBuf::from("results.jsonl"));
        assert!(config.export.enabled);
        assert!(config.schedule.is_none());
        assert!(config.admin.is_none());
        assert_eq!(config.selected_providers(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_request_model_falls_back_to_key() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.providers[0].request_model(), "alpha-large");
        assert_eq!(config.providers[1].request_model(), "beta");
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.providers[1].key = "alpha".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate provider key"));
    }

    #[test]
    fn test_rejects_unknown_subset_key() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.benchmark.providers = vec!["gamma".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_repeated_subset_key() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.benchmark.providers = vec!["alpha".to_string(), "alpha".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_rejects_zero_timeout_and_bad_interval() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.benchmark.timeout = 0;
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.schedule = Some(ScheduleConfig {
            enabled: true,
            interval: "every hour".to_string(),
            timeout: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_subset_preserves_order() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.benchmark.providers = vec!["beta".to_string(), "alpha".to_string()];
        config.validate().unwrap();
        assert_eq!(config.selected_providers(), vec!["beta", "alpha"]);
    }
}
