use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use quota_guard::config::{QuotaConfig, get_config_path, load_config_or_default};
use quota_guard::quota::{JsonFileStore, Presenter, QuotaEngine, SystemClock};

/// Initialize logging
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Load the config given on the command line, or the one at the default path
pub fn load_cli_config(path: Option<&Path>) -> Result<QuotaConfig> {
    let path: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };
    load_config_or_default(&path)
}

/// Build an engine over the configured state file
pub fn open_engine(config: &QuotaConfig, presenter: Arc<dyn Presenter>) -> Result<QuotaEngine> {
    let path = config.state_path()?;
    let store = JsonFileStore::open(&path)
        .with_context(|| format!("Failed to open quota state: {}", path.display()))?;
    debug!("Using quota state {}", path.display());

    Ok(QuotaEngine::new(
        Arc::new(store),
        presenter,
        Arc::new(SystemClock),
        config.engine_settings(),
    ))
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// "12 / 30" or "12 / unlimited"
pub fn format_usage(used: u32, limit: Option<u32>) -> String {
    match limit {
        Some(limit) => format!("{} / {}", used, limit),
        None => format!("{} / unlimited", used),
    }
}

pub fn format_limit(limit: Option<u32>) -> String {
    limit.map_or_else(|| "unlimited".to_string(), |l| l.to_string())
}

/// Local wall-clock time plus how far away it is
pub fn format_until(until: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format!(
        "{} (in {})",
        until.with_timezone(&Local).format("%H:%M"),
        format_duration(until - now)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
        assert_eq!(format_duration(Duration::minutes(5)), "5m");
        assert_eq!(format_duration(Duration::minutes(135)), "2h 15m");
        assert_eq!(format_duration(Duration::seconds(-3)), "0s");
    }

    #[test]
    fn test_format_usage() {
        assert_eq!(format_usage(12, Some(30)), "12 / 30");
        assert_eq!(format_usage(3, None), "3 / unlimited");
        assert_eq!(format_limit(None), "unlimited");
        assert_eq!(format_limit(Some(0)), "0");
    }
}
