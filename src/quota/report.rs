use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::quota::clock::{DayKey, day_key};
use crate::quota::evaluator::{is_allowance_active, is_blocked_now, is_over_limit};
use crate::quota::state::{CountingMode, DailyCounter, Rule};
use crate::quota::store::QuotaStore;

/// Today's usage of one tracked package
#[derive(Debug, Clone, Serialize)]
pub struct AppToday {
    pub package: String,
    pub rule: Rule,
    pub counter: DailyCounter,
    pub over_limit: bool,
    pub blocked: bool,
    pub allowance_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub minutes: u32,
    pub accesses: u32,
    /// Apps currently unavailable
    pub blocked: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodayReport {
    pub day: DayKey,
    pub totals: Totals,
    /// Most used first
    pub apps: Vec<AppToday>,
}

impl TodayReport {
    pub fn build(store: &dyn QuotaStore, now: DateTime<Utc>) -> Result<Self> {
        let day = day_key(now);
        let tracked = store.tracked_packages()?;

        let mut apps = Vec::with_capacity(tracked.len());
        for package in tracked.iter() {
            let rule = store.rule(package)?;
            let counter = store.counter(package, day)?;

            let over_limit = is_over_limit(&rule, &counter);
            let allowance_active = is_allowance_active(&rule, &counter, now);
            let blocked = is_blocked_now(&counter, now)
                || over_limit
                || (rule.counting_mode == CountingMode::Allowance && !allowance_active);

            apps.push(AppToday {
                package: package.clone(),
                rule,
                counter,
                over_limit,
                blocked,
                allowance_active,
            });
        }

        apps.sort_by(|a, b| {
            b.counter
                .minutes_used
                .cmp(&a.counter.minutes_used)
                .then_with(|| a.package.cmp(&b.package))
        });

        let totals = apps.iter().fold(Totals::default(), |mut totals, app| {
            totals.minutes = totals.minutes.saturating_add(app.counter.minutes_used);
            totals.accesses = totals.accesses.saturating_add(app.counter.accesses_used);
            totals.blocked += usize::from(app.blocked);
            totals
        });

        Ok(Self { day, totals, apps })
    }

    pub fn app(&self, package: &str) -> Option<&AppToday> {
        self.apps.iter().find(|app| app.package == package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::state::QuotaState;
    use crate::quota::store::{JsonFileStore, MemoryStore};
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 16, 12, 0, 0).unwrap()
    }

    fn use_minutes(store: &MemoryStore, package: &str, n: u32) {
        for _ in 0..n {
            store.increment_minutes(package, day_key(noon())).unwrap();
        }
    }

    #[test]
    fn test_report_sorted_and_totalled() {
        let store = MemoryStore::new();
        store.set_rule("com.b", Rule::default()).unwrap();
        store.set_rule("com.a", Rule::default()).unwrap();
        store.set_rule("com.c", Rule { minutes_limit: Some(3), ..Default::default() }).unwrap();
        use_minutes(&store, "com.a", 2);
        use_minutes(&store, "com.b", 2);
        use_minutes(&store, "com.c", 5);
        store.increment_accesses("com.c", day_key(noon())).unwrap();

        let report = TodayReport::build(&store, noon()).unwrap();

        let order: Vec<_> = report.apps.iter().map(|a| a.package.as_str()).collect();
        assert_eq!(order, vec!["com.c", "com.a", "com.b"]);
        assert_eq!(
            report.totals,
            Totals { minutes: 9, accesses: 1, blocked: 1 }
        );
        assert!(report.app("com.c").unwrap().over_limit);
        assert!(report.app("com.missing").is_none());
    }

    #[test]
    fn test_allowance_app_blocked_without_window() {
        let store = MemoryStore::new();
        let rule = Rule { counting_mode: CountingMode::Allowance, ..Default::default() };
        store.set_rule("com.video", rule).unwrap();

        let report = TodayReport::build(&store, noon()).unwrap();
        let app = report.app("com.video").unwrap();
        assert!(app.blocked);
        assert!(!app.allowance_active);

        store
            .set_allowance_until("com.video", day_key(noon()), noon() + Duration::minutes(10))
            .unwrap();
        let report = TodayReport::build(&store, noon()).unwrap();
        let app = report.app("com.video").unwrap();
        assert!(!app.blocked);
        assert!(app.allowance_active);
    }

    #[test]
    fn test_timed_block_counts_as_blocked() {
        let store = MemoryStore::new();
        store.set_rule("com.game", Rule::default()).unwrap();
        store
            .set_blocked_until("com.game", day_key(noon()), noon() + Duration::hours(1))
            .unwrap();

        let report = TodayReport::build(&store, noon()).unwrap();

        assert!(report.app("com.game").unwrap().blocked);
        assert!(!report.app("com.game").unwrap().over_limit);
        assert_eq!(report.totals.blocked, 1);
    }

    #[test]
    fn test_totals_saturate_on_huge_counters() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");

        let mut state = QuotaState::new();
        for package in ["com.a", "com.b"] {
            state.set_rule(package, Rule::default());
            let counter = state.counter_mut(package, day_key(noon()));
            counter.minutes_used = u32::MAX;
            counter.accesses_used = u32::MAX - 1;
        }
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        let report = TodayReport::build(&store, noon()).unwrap();

        assert_eq!(report.totals.minutes, u32::MAX);
        assert_eq!(report.totals.accesses, u32::MAX);
        assert_eq!(report.apps.len(), 2);
    }

    #[test]
    fn test_report_serializes_for_scripts() {
        let store = MemoryStore::new();
        store.set_rule("com.game", Rule { minutes_limit: Some(30), ..Default::default() }).unwrap();
        use_minutes(&store, "com.game", 4);

        let report = TodayReport::build(&store, noon()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["day"], day_key(noon()).to_string());
        assert_eq!(json["totals"]["minutes"], 4);
        assert_eq!(json["apps"][0]["package"], "com.game");
        assert_eq!(json["apps"][0]["rule"]["minutes_limit"], 30);
        assert_eq!(json["apps"][0]["counter"]["minutes_used"], 4);
        assert_eq!(json["apps"][0]["blocked"], false);
    }

    #[test]
    fn test_empty_report() {
        let report = TodayReport::build(&MemoryStore::new(), noon()).unwrap();
        assert!(report.apps.is_empty());
        assert_eq!(report.totals, Totals::default());
        assert_eq!(report.day, day_key(noon()));
    }
}
