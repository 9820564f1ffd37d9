use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::quota::clock::{DayKey, from_millis, to_millis};

/// Current persisted document version
pub const STATE_VERSION: &str = "1.0";

/// How usage of a package is accounted
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CountingMode {
    /// Accrue a minute counter while the package stays in the foreground
    #[default]
    Foreground,
    /// Gate entry on an explicitly granted time window
    Allowance,
}

impl std::fmt::Display for CountingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::Allowance => write!(f, "allowance"),
        }
    }
}

impl std::str::FromStr for CountingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "foreground" => Ok(Self::Foreground),
            "allowance" => Ok(Self::Allowance),
            other => anyhow::bail!("Unknown counting mode: {}", other),
        }
    }
}

/// Quota rule for one package
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Rule {
    /// Daily minutes; `None` is unlimited, `Some(0)` blocks immediately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_limit: Option<u32>,

    /// Daily foreground entries; `None` is unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_limit: Option<u32>,

    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    #[serde(default)]
    pub counting_mode: CountingMode,

    /// Window length granted by an allowance unlock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowance_minutes: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            minutes_limit: None,
            access_limit: None,
            notifications_enabled: true,
            counting_mode: CountingMode::Foreground,
            allowance_minutes: None,
        }
    }
}

/// Usage and block state of one package for one day
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DailyCounter {
    #[serde(default)]
    pub minutes_used: u32,

    #[serde(default)]
    pub accesses_used: u32,

    /// Epoch millis, 0 = not blocked
    #[serde(default)]
    pub blocked_until: i64,

    /// Epoch millis, 0 = no allowance window
    #[serde(default)]
    pub allowance_until: i64,
}

impl DailyCounter {
    pub fn blocked_until_at(&self) -> Option<DateTime<Utc>> {
        from_millis(self.blocked_until)
    }

    pub fn allowance_until_at(&self) -> Option<DateTime<Utc>> {
        from_millis(self.allowance_until)
    }

    pub fn block_until(&mut self, until: DateTime<Utc>) {
        self.blocked_until = to_millis(until);
    }

    pub fn allow_until(&mut self, until: DateTime<Utc>) {
        self.allowance_until = to_millis(until);
    }
}

/// Persisted document holding every rule, counter and the tracked index
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaState {
    pub version: String,

    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,

    /// Counters keyed by day, then package
    #[serde(default)]
    pub counters: BTreeMap<DayKey, BTreeMap<String, DailyCounter>>,

    #[serde(default)]
    pub tracked: BTreeSet<String>,
}

impl QuotaState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            rules: BTreeMap::new(),
            counters: BTreeMap::new(),
            tracked: BTreeSet::new(),
        }
    }

    pub fn rule(&self, package: &str) -> Rule {
        self.rules.get(package).cloned().unwrap_or_default()
    }

    pub fn set_rule(&mut self, package: &str, rule: Rule) {
        self.rules.insert(package.to_string(), rule);
        self.tracked.insert(package.to_string());
    }

    pub fn delete_rule(&mut self, package: &str, day: DayKey) {
        self.rules.remove(package);
        self.tracked.remove(package);
        self.remove_counter(package, day);
    }

    pub fn counter(&self, package: &str, day: DayKey) -> DailyCounter {
        self.counters
            .get(&day)
            .and_then(|day_counters| day_counters.get(package))
            .copied()
            .unwrap_or_default()
    }

    /// Counter cell for `package` on `day`, created zeroed on first use
    pub fn counter_mut(&mut self, package: &str, day: DayKey) -> &mut DailyCounter {
        self.counters
            .entry(day)
            .or_default()
            .entry(package.to_string())
            .or_default()
    }

    pub fn remove_counter(&mut self, package: &str, day: DayKey) {
        if let Some(day_counters) = self.counters.get_mut(&day) {
            day_counters.remove(package);
            if day_counters.is_empty() {
                self.counters.remove(&day);
            }
        }
    }

    /// Drop every counter day strictly before `day`, returning how many went
    pub fn prune_counters_before(&mut self, day: DayKey) -> usize {
        let kept = self.counters.split_off(&day);
        let removed = self.counters.len();
        self.counters = kept;
        removed
    }
}

impl Default for QuotaState {
    fn default() -> Self {
        Self::new()
    }
}
