//! Poller configuration.
//!
//! Values are layered with [Figment], later layers winning:
//!
//! 1. built-in defaults
//! 2. the TOML file named by `COMMITMENTS_CONFIG`, if set
//! 3. `COMMITMENTS_*` environment variables, with `__` separating nested keys
//!    (`COMMITMENTS_RPC__URL` sets `rpc.url`)

use std::{path::PathBuf, time::Duration};

use evm_rpc_events::EvmRpcConfig;
use figment::{
    Figment,
    providers::{Env, Format as _, Toml},
};
use serde::Deserialize;

use crate::storage::RetryPolicy;

/// Environment variable holding the path of the TOML config file.
pub const CONFIG_PATH_ENV_VAR: &str = "COMMITMENTS_CONFIG";

const ENV_PREFIX: &str = "COMMITMENTS_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Read(#[source] std::io::Error),

    #[error("failed to parse config")]
    Extract(#[source] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// DuckDB file holding the event tables.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Pause between the end of a sync cycle and the start of the next (default: 30.0)
    #[serde(default)]
    pub poll_interval_secs: ConfigDuration<30>,

    #[serde(default)]
    pub retry: RetryConfig,

    pub rpc: EvmRpcConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mev_commit.duckdb")
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts < 1 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1"));
        }
        if !(self.retry.backoff_factor >= 1.0) {
            return Err(ConfigError::Invalid("retry.backoff_factor must be at least 1.0"));
        }
        if self.rpc.max_block_range < 1 {
            return Err(ConfigError::Invalid("rpc.max_block_range must be at least 1"));
        }
        Ok(())
    }
}

/// Backoff while the DuckDB file is locked by another process.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per storage operation, the first one included (default: 5)
    pub max_attempts: usize,
    /// Delay before the first retry (default: 1.0)
    pub initial_delay_secs: ConfigDuration<1>,
    /// Multiplier applied to the delay after each retry (default: 2.0)
    pub backoff_factor: f32,
    /// Upper bound on a single delay (default: 60.0)
    pub max_delay_secs: ConfigDuration<60>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_secs: ConfigDuration::default(),
            backoff_factor: 2.0,
            max_delay_secs: ConfigDuration::default(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay_secs.into(),
            backoff_factor: config.backoff_factor,
            max_delay: config.max_delay_secs.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OutputConfig {
    /// Parquet file rewritten with the commitments view after every cycle.
    pub parquet_path: Option<PathBuf>,
}

/// A duration in floating-point seconds, defaulting to `DEFAULT_SECS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigDuration<const DEFAULT_SECS: u64>(Duration);

impl<const DEFAULT_SECS: u64> Default for ConfigDuration<DEFAULT_SECS> {
    fn default() -> Self {
        Self(Duration::from_secs(DEFAULT_SECS))
    }
}

impl<const DEFAULT_SECS: u64> From<ConfigDuration<DEFAULT_SECS>> for Duration {
    fn from(val: ConfigDuration<DEFAULT_SECS>) -> Self {
        val.0
    }
}

impl<'de, const DEFAULT_SECS: u64> Deserialize<'de> for ConfigDuration<DEFAULT_SECS> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = <Option<f64>>::deserialize(deserializer)?;
        match secs {
            None => Ok(Self::default()),
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Loads the config from the file named by `COMMITMENTS_CONFIG` and the environment.
pub fn load() -> Result<Config, ConfigError> {
    let mut figment = Figment::new();
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV_VAR) {
        let contents = fs_err::read_to_string(PathBuf::from(path)).map_err(ConfigError::Read)?;
        figment = figment.merge(Toml::string(&contents));
    }
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
    from_figment(figment)
}

pub fn from_figment(figment: Figment) -> Result<Config, ConfigError> {
    let config: Config = figment
        .extract()
        .map_err(|err| ConfigError::Extract(Box::new(err)))?;
    config.validate()?;
    Ok(config)
}
