use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration of a [`Memoizer`](crate::Memoizer).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MemoizerConfig {
    /// The name of the memoizer, used to tag metrics.
    ///
    /// Defaults to `default`.
    pub name: String,

    /// The time-to-live applied to every cached result.
    ///
    /// Defaults to `5m`.
    #[serde(with = "humantime_serde")]
    pub default_expiration: Duration,

    /// The interval of the background sweep purging expired entries.
    ///
    /// A zero interval disables the sweep, expired entries are then purged lazily.
    ///
    /// Defaults to `10m`.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Whether failed computations are cached as well.
    ///
    /// When disabled, the next call after a failure runs the computation again. When enabled,
    /// the error is replayed from the cache until it expires.
    ///
    /// Defaults to `false`.
    pub cache_errors: bool,

    /// The number of independently locked shards used to track in-flight computations.
    ///
    /// Defaults to `64`.
    pub coordinator_shards: usize,
}

impl Default for MemoizerConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            default_expiration: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(10 * 60),
            cache_errors: false,
            coordinator_shards: 64,
        }
    }
}

impl MemoizerConfig {
    /// Loads the configuration from the given YAML file, or the defaults if no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Self::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}
