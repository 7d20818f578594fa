//! Configuration management for the jdtsd daemon.
//!
//! Handles loading, parsing and validation of the YAML configuration file
//! describing the sensor device, polling cadence and output sinks.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;

use crate::{desired_state::DesiredState, drivers::jdts::DEVICE_PATH, retry::RetryPolicy};

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "JDTSD_CONFIG";

/// Longest accepted polling period, one hour.
pub const MAX_POLL_PERIOD_MS: u64 = 3_600_000;

pub const MAX_SHUTDOWN_GRACE_PERIODS: u32 = 100;

/// Main configuration structure for the jdtsd daemon.
///
/// # Example
///
/// ```yaml
/// version: 1
/// poll_period_ms: 200
/// shutdown_grace_periods: 2
/// initial_state:
///   power: true
///   continuous: true
/// retry:
///   max_attempts: 10
///   backoff_ms: 200
/// device:
///   kind: char-device
///   path: /dev/jdts_temperature
/// output:
///   log_samples: true
///   json: false
/// enable_dbus: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Delay between two polls in milliseconds.
    #[serde(default = "defaults::poll_period_ms")]
    pub poll_period_ms: u64,

    /// Stop waits this many poll periods for the loop to finish.
    #[serde(default = "defaults::shutdown_grace_periods")]
    pub shutdown_grace_periods: u32,

    /// Configuration pushed to the sensor on startup.
    #[serde(default)]
    pub initial_state: InitialStateCfg,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub device: DeviceCfg,

    #[serde(default)]
    pub output: OutputCfg,

    /// Whether to expose the session bus interface.
    #[serde(default)]
    pub enable_dbus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            poll_period_ms: defaults::poll_period_ms(),
            shutdown_grace_periods: defaults::shutdown_grace_periods(),
            initial_state: InitialStateCfg::default(),
            retry: RetryPolicy::default(),
            device: DeviceCfg::default(),
            output: OutputCfg::default(),
            enable_dbus: false,
        }
    }
}

impl Config {
    /// Checks value ranges.
    ///
    /// # Example
    ///
    /// ```
    /// use jdtsd::config::Config;
    ///
    /// let config = Config::default();
    /// config.validate()?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.poll_period_ms == 0 {
            anyhow::bail!("poll_period_ms must be greater than zero");
        }
        if self.poll_period_ms > MAX_POLL_PERIOD_MS {
            anyhow::bail!("poll_period_ms must not exceed {MAX_POLL_PERIOD_MS}");
        }
        if !(1..=MAX_SHUTDOWN_GRACE_PERIODS).contains(&self.shutdown_grace_periods) {
            anyhow::bail!("shutdown_grace_periods must be between 1 and {MAX_SHUTDOWN_GRACE_PERIODS}");
        }
        if self.retry.max_attempts == Some(0) {
            anyhow::bail!(
                "retry.max_attempts must be at least 1, leave it out to retry without limit"
            );
        }
        match &self.device {
            DeviceCfg::CharDevice { path } if path.as_os_str().is_empty() => {
                anyhow::bail!("Device path cannot be empty")
            }
            DeviceCfg::Simulated { failure_rate } if !(0.0..=1.0).contains(failure_rate) => {
                anyhow::bail!("Simulated failure_rate {failure_rate} is outside 0.0..=1.0")
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether moving from `self` to `other` changes anything besides the
    /// `output` section, which is the only part applied live.
    pub fn requires_restart(&self, other: &Config) -> bool {
        let mut other = other.clone();
        other.output = self.output;
        *self != other
    }
}

/// Sensor configuration requested at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialStateCfg {
    #[serde(default = "defaults::enabled")]
    pub power: bool,

    #[serde(default = "defaults::enabled")]
    pub continuous: bool,
}

impl Default for InitialStateCfg {
    fn default() -> Self {
        Self {
            power: true,
            continuous: true,
        }
    }
}

impl From<InitialStateCfg> for DesiredState {
    fn from(cfg: InitialStateCfg) -> Self {
        Self {
            power_enabled: cfg.power,
            continuous_mode: cfg.continuous,
        }
    }
}

/// Sensor backend variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeviceCfg {
    /// Kernel driver character device.
    CharDevice {
        #[serde(default = "defaults::device_path")]
        path: PathBuf,
    },
    /// In-process simulator, for running without hardware.
    Simulated {
        /// Probability in `0.0..=1.0` that a device call fails.
        #[serde(default)]
        failure_rate: f64,
    },
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self::CharDevice {
            path: defaults::device_path(),
        }
    }
}

/// Presentation sinks fed by the consumer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCfg {
    /// Log every sample at debug level.
    #[serde(default = "defaults::enabled")]
    pub log_samples: bool,

    /// Print every poll outcome as a JSON line on stdout.
    #[serde(default)]
    pub json: bool,
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self {
            log_samples: true,
            json: false,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn poll_period_ms() -> u64 {
        200
    }

    pub fn shutdown_grace_periods() -> u32 {
        2
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn device_path() -> PathBuf {
        PathBuf::from(super::DEVICE_PATH)
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(env_path));
    }

    // XDG_CONFIG_HOME or $HOME/.config
    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("jdtsd/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/jdtsd/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    anyhow::bail!("Configuration file not found in any standard location")
}

/// Owns the live configuration and the file it came from.
///
/// # Example
///
/// ```no_run
/// use jdtsd::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml"))).await?;
/// let period = config_manager.get().await.poll_period_ms;
/// config_manager.reload().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path: Some(path),
        }
    }

    /// Manager over built-in defaults, with no backing file.
    pub fn from_defaults() -> Self {
        Self {
            config: Arc::new(RwLock::new(Config::default())),
            path: None,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. `JDTSD_CONFIG` environment variable
    /// 3. `$XDG_CONFIG_HOME/jdtsd/config.yml` or `~/.config/jdtsd/config.yml`
    /// 4. `/etc/jdtsd/config.yml`
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    /// Like [`load`](Self::load), but runs on built-in defaults when no
    /// path is given and no standard location holds a file.
    pub async fn load_or_default(path: Option<PathBuf>) -> Result<Self> {
        match path.map_or_else(locate_config, Ok) {
            Ok(path) => Self::load(Some(path)).await,
            Err(_) => {
                info!("No configuration file found, using built-in defaults");
                Ok(Self::from_defaults())
            }
        }
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    pub async fn get_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, Config> {
        self.config.write().await
    }

    /// Backing file, `None` when running on defaults.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-reads the backing file and replaces the live configuration.
    ///
    /// Returns the previous configuration so callers can tell what changed.
    pub async fn reload(&self) -> Result<Config> {
        let path = self
            .path
            .as_deref()
            .context("Running on built-in defaults, nothing to reload")?;
        info!("Reloading config from: {}", path.display());
        let new_config = Self::load_config_from_path(path).await?;

        let previous = std::mem::replace(&mut *self.config.write().await, new_config);
        info!("Configuration reloaded successfully");
        Ok(previous)
    }

    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        if config.version != 1 {
            anyhow::bail!(
                "Unsupported config version {} in file: {}",
                config.version,
                path.display()
            );
        }

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
