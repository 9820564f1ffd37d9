use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::quota::engine::EngineSettings;
use crate::quota::events::PackageFilter;
use crate::quota::gate::BlockReasons;
use crate::quota::session::TrackerSettings;

const APP_NAME: &str = "quota-guard";

/// Which presenter the daemon drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenterKind {
    #[default]
    Log,
    Desktop,
}

/// Daemon and CLI configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Seconds between minute ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Duplicate foreground events for one package within this window are dropped
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Where rules and counters live (default: per-user data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    #[serde(default = "default_block_reason")]
    pub block_reason: String,

    #[serde(default = "default_allowance_reason")]
    pub allowance_reason: String,

    #[serde(default)]
    pub presenter: PresenterKind,

    /// Days of usage history kept, today included
    #[serde(default = "default_retain_days")]
    pub retain_days: u32,

    /// Packages never tracked (this app, system UI)
    #[serde(default)]
    pub ignored_packages: Vec<String>,

    /// Home screens; switching to one counts as leaving the foreground
    #[serde(default)]
    pub launcher_packages: Vec<String>,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_debounce_ms() -> u64 {
    800
}

fn default_block_reason() -> String {
    BlockReasons::default().limit
}

fn default_allowance_reason() -> String {
    BlockReasons::default().allowance
}

fn default_retain_days() -> u32 {
    30
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            debounce_ms: default_debounce_ms(),
            state_path: None,
            block_reason: default_block_reason(),
            allowance_reason: default_allowance_reason(),
            presenter: PresenterKind::default(),
            retain_days: default_retain_days(),
            ignored_packages: Vec::new(),
            launcher_packages: Vec::new(),
        }
    }
}

impl QuotaConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tracker: TrackerSettings {
                tick_interval: Duration::from_secs(self.tick_interval_secs),
                debounce: chrono::Duration::milliseconds(
                    i64::try_from(self.debounce_ms).unwrap_or(i64::MAX),
                ),
            },
            reasons: BlockReasons {
                limit: self.block_reason.clone(),
                allowance: self.allowance_reason.clone(),
            },
            filter: PackageFilter::new(
                self.ignored_packages.iter().cloned(),
                self.launcher_packages.iter().cloned(),
            ),
        }
    }

    /// Configured state file, or the per-user default
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(path.clone()),
            None => get_state_path(),
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .context("Could not determine home directory")
}

/// Get the platform-specific config file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.yaml"))
}

/// Get the platform-specific state file path
pub fn get_state_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_local_dir().join("state.json"))
}

/// Load configuration from YAML file
pub fn load_config(path: &Path) -> Result<QuotaConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: QuotaConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load the config at `path`, or the default config if the file is missing
pub fn load_config_or_default(path: &Path) -> Result<QuotaConfig> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(QuotaConfig::default())
    }
}

/// Longest accepted minute-tick period
pub const MAX_TICK_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Validate configuration
pub fn validate_config(config: &QuotaConfig) -> Result<()> {
    if config.tick_interval_secs == 0 {
        anyhow::bail!("tick_interval_secs must be greater than zero");
    }

    if config.tick_interval_secs > MAX_TICK_INTERVAL_SECS {
        anyhow::bail!(
            "tick_interval_secs must be at most {} (one day), got {}",
            MAX_TICK_INTERVAL_SECS,
            config.tick_interval_secs
        );
    }

    if config.retain_days == 0 {
        anyhow::bail!("retain_days must be at least 1");
    }

    if let Some(package) = config
        .ignored_packages
        .iter()
        .find(|p| config.launcher_packages.contains(p))
    {
        anyhow::bail!(
            "Package '{}' is listed in both ignored_packages and launcher_packages",
            package
        );
    }

    Ok(())
}

/// Example configuration written by `init`
pub const EXAMPLE_CONFIG: &str = include_str!("../example-config.yaml");
