//! Shared fixtures for engine tests

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::quota::clock::{Clock, DayKey};
use crate::quota::presenter::Presenter;
use crate::quota::state::{DailyCounter, Rule};
use crate::quota::store::{MemoryStore, QuotaStore, TrackedPackages};

/// Presentation signal captured by [`RecordingPresenter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Show(String),
    Dismiss,
    Notify(String),
}

#[derive(Debug, Default)]
pub struct RecordingPresenter {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingPresenter {
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn shows(&self, package: &str) -> usize {
        self.count(&Signal::Show(package.to_string()))
    }

    pub fn notifications(&self, package: &str) -> usize {
        self.count(&Signal::Notify(package.to_string()))
    }

    fn count(&self, signal: &Signal) -> usize {
        self.signals().iter().filter(|s| *s == signal).count()
    }

    fn record(&self, signal: Signal) {
        self.signals.lock().unwrap().push(signal);
    }
}

impl Presenter for RecordingPresenter {
    fn show_block_overlay(&self, package: &str, _reason: &str) {
        self.record(Signal::Show(package.to_string()));
    }

    fn dismiss_block_overlay(&self) {
        self.record(Signal::Dismiss);
    }

    fn post_limit_reached_notification(&self, package: &str) {
        self.record(Signal::Notify(package.to_string()));
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Mid-morning, far from any midnight in any zone's local day
    pub fn new() -> Self {
        Self::at(Utc.with_ymd_and_hms(2025, 11, 16, 12, 0, 0).unwrap())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now += by;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Memory store that can be switched into failing every call
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        Ok(())
    }
}

impl QuotaStore for FlakyStore {
    fn rule(&self, package: &str) -> Result<Rule> {
        self.check()?;
        self.inner.rule(package)
    }

    fn set_rule(&self, package: &str, rule: Rule) -> Result<()> {
        self.check()?;
        self.inner.set_rule(package, rule)
    }

    fn delete_rule(&self, package: &str, day: DayKey) -> Result<()> {
        self.check()?;
        self.inner.delete_rule(package, day)
    }

    fn counter(&self, package: &str, day: DayKey) -> Result<DailyCounter> {
        self.check()?;
        self.inner.counter(package, day)
    }

    fn increment_minutes(&self, package: &str, day: DayKey) -> Result<u32> {
        self.check()?;
        self.inner.increment_minutes(package, day)
    }

    fn increment_accesses(&self, package: &str, day: DayKey) -> Result<u32> {
        self.check()?;
        self.inner.increment_accesses(package, day)
    }

    fn set_blocked_until(&self, package: &str, day: DayKey, until: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.set_blocked_until(package, day, until)
    }

    fn clear_blocked(&self, package: &str, day: DayKey) -> Result<()> {
        self.check()?;
        self.inner.clear_blocked(package, day)
    }

    fn set_allowance_until(&self, package: &str, day: DayKey, until: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.set_allowance_until(package, day, until)
    }

    fn clear_allowance(&self, package: &str, day: DayKey) -> Result<()> {
        self.check()?;
        self.inner.clear_allowance(package, day)
    }

    fn reset_counter(&self, package: &str, day: DayKey) -> Result<()> {
        self.check()?;
        self.inner.reset_counter(package, day)
    }

    fn prune_counters_before(&self, day: DayKey) -> Result<usize> {
        self.check()?;
        self.inner.prune_counters_before(day)
    }

    fn tracked_packages(&self) -> Result<TrackedPackages> {
        self.check()?;
        self.inner.tracked_packages()
    }
}

/// Store, presenter and clock wired together the way the engine shares them
pub struct Fixture {
    pub store: Arc<FlakyStore>,
    pub presenter: Arc<RecordingPresenter>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(FlakyStore::default()),
            presenter: Arc::new(RecordingPresenter::default()),
            clock: Arc::new(ManualClock::new()),
        }
    }

    pub fn today(&self) -> DayKey {
        crate::quota::clock::day_key(self.clock.now())
    }

    pub fn counter(&self, package: &str) -> DailyCounter {
        self.store.counter(package, self.today()).unwrap()
    }
}
