use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inbound signal from the platform's foreground watcher
///
/// One JSON object per line on the daemon's stdin, e.g.
/// `{"event":"changed","package":"com.game","at":"2025-11-16T12:00:00Z"}`.
/// A missing `at` means "now".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ForegroundEvent {
    Changed {
        package: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at: Option<DateTime<Utc>>,
    },
    Lost {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at: Option<DateTime<Utc>>,
    },
    ScreenOff,
    ScreenOn,
}

impl ForegroundEvent {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// What to do with a foreground package before the tracker sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Track,
    Ignore,
    /// Home screen; treated as the foreground being lost
    Lost,
}

#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    ignored: BTreeSet<String>,
    launchers: BTreeSet<String>,
}

impl PackageFilter {
    pub fn new(
        ignored: impl IntoIterator<Item = String>,
        launchers: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            ignored: ignored.into_iter().collect(),
            launchers: launchers.into_iter().collect(),
        }
    }

    pub fn route(&self, package: &str) -> Route {
        if self.ignored.contains(package) {
            Route::Ignore
        } else if self.launchers.contains(package) {
            Route::Lost
        } else {
            Route::Track
        }
    }
}
