use crate::benchmark::{DEFAULT_COOLDOWN, DEFAULT_REPETITIONS};
use crate::chart::DEFAULT_CHART_BASE_URL;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
    #[serde(default = "default_cooldown", with = "duration_str")]
    pub cooldown: Duration,
    #[serde(default)]
    pub charts: ChartsConfig,
    #[serde(default)]
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartsConfig {
    #[serde(default = "default_charts_enabled")]
    pub enabled: bool,
    #[serde(default = "default_chart_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default = "default_chart_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServeConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_serve_interval", with = "duration_str")]
    pub interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repetitions: default_repetitions(),
            cooldown: default_cooldown(),
            charts: ChartsConfig::default(),
            serve: ServeConfig::default(),
        }
    }
}

impl Default for ChartsConfig {
    fn default() -> Self {
        Self {
            enabled: default_charts_enabled(),
            base_url: default_chart_base_url(),
            download_dir: None,
            timeout_ms: default_chart_timeout_ms(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval: default_serve_interval(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repetitions < 1 {
            return Err(ConfigError::Validation(
                "repetitions must be >= 1".to_string(),
            ));
        }
        validate_charts(&self.charts)?;
        validate_serve(&self.serve)?;
        Ok(())
    }

    pub fn chart_timeout(&self) -> Duration {
        Duration::from_millis(self.charts.timeout_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_charts(cfg: &ChartsConfig) -> Result<(), ConfigError> {
    if Url::parse(&cfg.base_url).is_err() {
        return Err(ConfigError::Validation(format!(
            "charts.base_url '{}' is not a valid URL",
            cfg.base_url
        )));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "charts.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_serve(cfg: &ServeConfig) -> Result<(), ConfigError> {
    if cfg.listen.trim().is_empty() {
        return Err(ConfigError::Validation(
            "serve.listen is required".to_string(),
        ));
    }
    if SocketAddr::from_str(&cfg.listen).is_err() {
        return Err(ConfigError::Validation(
            "serve.listen must be a host:port socket address".to_string(),
        ));
    }
    if cfg.interval < Duration::from_secs(1) {
        return Err(ConfigError::Validation(
            "serve.interval must be >= 1s".to_string(),
        ));
    }
    Ok(())
}

/// Durations written as `1s`, `1500ms`, `2m`.
mod duration_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

const fn default_repetitions() -> usize {
    DEFAULT_REPETITIONS
}

const fn default_cooldown() -> Duration {
    DEFAULT_COOLDOWN
}

const fn default_charts_enabled() -> bool {
    true
}

fn default_chart_base_url() -> String {
    DEFAULT_CHART_BASE_URL.to_string()
}

const fn default_chart_timeout_ms() -> u64 {
    10_000
}

fn default_listen() -> String {
    "127.0.0.1:9110".to_string()
}

const fn default_serve_interval() -> Duration {
    Duration::from_secs(60)
}
