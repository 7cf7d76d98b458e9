//! Application configuration.
//!
//! Loaded once at the boundary (TOML file, then `SECTORLAB_*` environment
//! overrides), validated, and then handed to components as immutable values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SECTORLAB_";

/// Upper bound for `data_request.request_timeout_secs` (one day).
pub const MAX_REQUEST_TIMEOUT_SECS: f64 = 86_400.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub strategy: StrategyConfig,
    pub data_request: DataRequestConfig,
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
}

/// Everything the analysis pipeline needs for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Minimum number of price samples required before clustering.
    pub min_data_points: usize,
    pub clustering: ClusteringConfig,
    pub sectors: SectorConfig,
    pub density: DensityConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_data_points: 30,
            clustering: ClusteringConfig::default(),
            sectors: SectorConfig::default(),
            density: DensityConfig::default(),
        }
    }
}

/// K-means and elbow-selection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Upper bound for the number of sectors.
    pub max_clusters: usize,
    /// Number of k-means++ restarts per candidate k.
    pub n_init: usize,
    /// Master seed for centroid initialization.
    pub random_state: u64,
    pub max_iterations: usize,
    /// Stop Lloyd iterations once no centroid moves more than this.
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_clusters: 10,
            n_init: 10,
            random_state: 42,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorConfig {
    /// Fraction of sector width used as the boundary guard band.
    pub epsilon_factor: f64,
    /// Fraction of sector width a price must deviate from the expected value to signal.
    pub threshold_factor: f64,
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self {
            epsilon_factor: 0.01,
            threshold_factor: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Sectors with fewer members are treated as a point mass at the centroid.
    pub min_members: usize,
    /// Grid resolution for expected value and median.
    pub integration_points: usize,
    /// Grid resolution for the rendered density curve.
    pub curve_points: usize,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            min_members: 2,
            integration_points: 1000,
            curve_points: 200,
        }
    }
}

/// Defaults applied to bar requests that omit parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataRequestConfig {
    pub default_duration: String,
    pub default_bar_size: String,
    pub default_rth: bool,
    pub request_timeout_secs: f64,
}

impl DataRequestConfig {
    /// The timeout as a `Duration`, clamped to `MAX_REQUEST_TIMEOUT_SECS`.
    /// Values `validate` would reject fall back to the default.
    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_secs.min(MAX_REQUEST_TIMEOUT_SECS))
            .unwrap_or_else(|_| Duration::from_secs(50))
    }
}

impl Default for DataRequestConfig {
    fn default() -> Self {
        Self {
            default_duration: "1 M".into(),
            default_bar_size: "1 day".into(),
            default_rth: true,
            request_timeout_secs: 50.0,
        }
    }
}

/// Bounded pool for CPU-bound clustering and density work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { threads: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load configuration from `path` (defaults if absent), apply environment
    /// overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::warn!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides(ENV_PREFIX, std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file without overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string. Missing keys take defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `<prefix>NAME=value` overrides. Unknown names are ignored.
    pub fn apply_env_overrides<I>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(prefix) else {
                continue;
            };
            match name {
                "LOG_LEVEL" => self.logging.level = value.to_lowercase(),
                "MAX_CLUSTERS" => {
                    self.strategy.clustering.max_clusters = parse_override(&key, &value)?
                }
                "MIN_DATA_POINTS" => self.strategy.min_data_points = parse_override(&key, &value)?,
                "REQUEST_TIMEOUT_SECS" => {
                    self.data_request.request_timeout_secs = parse_override(&key, &value)?
                }
                "WORKER_THREADS" => self.workers.threads = parse_override(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        if s.min_data_points == 0 {
            return Err(invalid("strategy.min_data_points must be >= 1"));
        }
        if s.clustering.max_clusters == 0 {
            return Err(invalid("strategy.clustering.max_clusters must be >= 1"));
        }
        if s.clustering.n_init == 0 {
            return Err(invalid("strategy.clustering.n_init must be >= 1"));
        }
        if s.clustering.max_iterations == 0 {
            return Err(invalid("strategy.clustering.max_iterations must be >= 1"));
        }
        if !(s.clustering.tolerance.is_finite() && s.clustering.tolerance >= 0.0) {
            return Err(invalid("strategy.clustering.tolerance must be finite and >= 0"));
        }
        for (name, factor) in [
            ("epsilon_factor", s.sectors.epsilon_factor),
            ("threshold_factor", s.sectors.threshold_factor),
        ] {
            if !(factor.is_finite() && factor >= 0.0) {
                return Err(invalid(&format!(
                    "strategy.sectors.{name} must be finite and >= 0"
                )));
            }
        }
        if s.density.min_members == 0 {
            return Err(invalid("strategy.density.min_members must be >= 1"));
        }
        if s.density.integration_points < 2 || s.density.curve_points < 2 {
            return Err(invalid("strategy.density grid resolutions must be >= 2"));
        }
        let timeout = self.data_request.request_timeout_secs;
        if !(timeout.is_finite() && timeout > 0.0 && timeout <= MAX_REQUEST_TIMEOUT_SECS) {
            return Err(invalid(&format!(
                "data_request.request_timeout_secs must be in (0, {MAX_REQUEST_TIMEOUT_SECS}]"
            )));
        }
        if self.workers.threads == 0 {
            return Err(invalid("workers.threads must be >= 1"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(&format!(
                "logging.level must be one of {LOG_LEVELS:?}, got '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: cannot parse '{value}'")))
}
