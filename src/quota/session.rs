use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::quota::clock::{Clock, day_key};
use crate::quota::evaluator::{is_allowance_active, is_blocked_now, is_over_limit};
use crate::quota::gate::BlockGate;
use crate::quota::state::CountingMode;
use crate::quota::store::QuotaStore;

/// Timing knobs of the session tracker
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    /// How often a foreground package accrues one minute
    pub tick_interval: Duration,
    /// Repeated change events for the same package inside this window are dropped
    pub debounce: chrono::Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            debounce: chrono::Duration::milliseconds(800),
        }
    }
}

/// What a foreground change did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Duplicate event inside the debounce window; nothing touched
    Debounced,
    /// Package has no rule; tracker went idle
    Untracked,
    /// Package is blocked or over its limit; overlay shown
    Blocked,
    /// Allowance mode without an open window; overlay shown
    AllowanceDenied,
    /// Allowance window open; entry allowed, no ticker
    AllowanceActive,
    /// Minute ticker started for the package
    Active,
    /// Package was already active; its ticker keeps running
    AlreadyActive,
}

enum TickOutcome {
    Continue,
    Stop,
}

/// Foreground-session state machine
///
/// Holds the current active package and at most one minute ticker. Every
/// change of either happens under one async mutex, so two concurrent
/// transitions never leave two tickers alive or a ticker running for a
/// package that is no longer current.
#[derive(Clone)]
pub struct SessionTracker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn QuotaStore>,
    gate: Arc<BlockGate>,
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
    slot: Mutex<ActiveSlot>,
    last_seen: std::sync::Mutex<LastSeen>,
}

/// Debounce memory of the raw event stream
#[derive(Debug, Default)]
struct LastSeen {
    package: Option<String>,
    changed_at: Option<DateTime<Utc>>,
}

/// The current package and its ticker, always changed together
#[derive(Default)]
struct ActiveSlot {
    current: Option<String>,
    ticker: Option<Ticker>,
}

struct Ticker {
    alive: Arc<AtomicBool>,
}

impl Ticker {
    fn cancel(self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl ActiveSlot {
    fn go_idle(&mut self) {
        if let Some(previous) = self.current.take() {
            debug!("Session: {} -> idle", previous);
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }

    fn is_ticking(&self, package: &str) -> bool {
        self.current.as_deref() == Some(package) && self.ticker.is_some()
    }
}

impl SessionTracker {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        gate: Arc<BlockGate>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                gate,
                clock,
                settings,
                slot: Mutex::new(ActiveSlot::default()),
                last_seen: std::sync::Mutex::new(LastSeen::default()),
            }),
        }
    }

    /// Handle `package` coming to the foreground at `at`
    ///
    /// On a store failure the error is returned and the session is left as
    /// it was; the next event retries.
    pub async fn on_foreground_change(&self, package: &str, at: DateTime<Utc>) -> Result<Transition> {
        let mut slot = self.inner.slot.lock().await;

        if self.inner.is_repeat(package, at) {
            debug!("Debounced duplicate change event for {}", package);
            return Ok(Transition::Debounced);
        }

        let transition = self.inner.enter(&mut slot, package, at)?;
        // Only a handled event moves the debounce window
        self.inner.update_last_seen(|seen| {
            seen.package = Some(package.to_string());
            seen.changed_at = Some(at);
        });

        debug!("Foreground {} -> {:?}", package, transition);
        Ok(transition)
    }

    /// Screen off or back to the launcher: stop counting, drop any overlay
    pub async fn on_foreground_lost(&self, at: DateTime<Utc>) {
        let mut slot = self.inner.slot.lock().await;
        self.inner.update_last_seen(|seen| {
            seen.package = None;
            seen.changed_at = Some(at);
        });
        slot.go_idle();
        drop(slot);

        self.inner.gate.dismiss_block();
    }

    /// Screen came back on; only restarts the debounce window
    pub fn on_screen_on(&self, at: DateTime<Utc>) {
        self.inner.update_last_seen(|seen| seen.changed_at = Some(at));
    }

    /// Go idle if `package` is the active one. Returns whether it was.
    pub async fn release(&self, package: &str) -> bool {
        let mut slot = self.inner.slot.lock().await;
        if slot.current.as_deref() == Some(package) {
            slot.go_idle();
            true
        } else {
            false
        }
    }

    pub async fn current_package(&self) -> Option<String> {
        self.inner.slot.lock().await.current.clone()
    }

    /// Cancel any running ticker
    pub async fn shutdown(&self) {
        self.inner.slot.lock().await.go_idle();
        info!("Session tracker stopped");
    }
}

impl Inner {
    fn update_last_seen(&self, f: impl FnOnce(&mut LastSeen)) {
        match self.last_seen.lock() {
            Ok(mut seen) => f(&mut seen),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Whether `package` repeats the last handled change too soon
    fn is_repeat(&self, package: &str, at: DateTime<Utc>) -> bool {
        let window = self.settings.debounce;
        let mut repeat = false;

        self.update_last_seen(|seen| {
            repeat = seen.package.as_deref() == Some(package)
                && seen.changed_at.is_some_and(|last| at - last < window);
        });

        repeat
    }

    fn enter(self: &Arc<Self>, slot: &mut ActiveSlot, package: &str, now: DateTime<Utc>) -> Result<Transition> {
        if !self.store.is_tracked(package)? {
            debug!("{} is not tracked", package);
            slot.go_idle();
            return Ok(Transition::Untracked);
        }

        let day = day_key(now);
        let rule = self.store.rule(package)?;
        let counter = self.store.counter(package, day)?;

        let blocked = is_blocked_now(&counter, now);
        let over = is_over_limit(&rule, &counter);
        debug!(
            "Opened {} blocked={} over={} minutes={}/{:?} accesses={}/{:?}",
            package,
            blocked,
            over,
            counter.minutes_used,
            rule.minutes_limit,
            counter.accesses_used,
            rule.access_limit
        );

        // One access per switch-in, never per tick
        let switched = slot.current.as_deref() != Some(package);
        if switched && !blocked && !over {
            let accesses = self.store.increment_accesses(package, day)?;
            debug!("Access {} for {}", accesses, package);
        }

        if blocked || over {
            if over && !blocked {
                self.gate.block_until_midnight(package, now)?;
            }
            slot.go_idle();
            self.gate.show_block(package, &self.gate.reasons().limit);
            return Ok(Transition::Blocked);
        }

        if rule.counting_mode == CountingMode::Allowance {
            slot.go_idle();
            if is_allowance_active(&rule, &counter, now) {
                return Ok(Transition::AllowanceActive);
            }
            self.gate.show_block(package, &self.gate.reasons().allowance);
            return Ok(Transition::AllowanceDenied);
        }

        let transition = if slot.is_ticking(package) {
            Transition::AlreadyActive
        } else {
            slot.go_idle();
            slot.ticker = Some(self.spawn_ticker(package));
            slot.current = Some(package.to_string());
            info!("Counting foreground minutes for {}", package);
            Transition::Active
        };

        // A stale overlay may still be up from an earlier block
        self.gate.dismiss_block();
        Ok(transition)
    }

    fn spawn_ticker(self: &Arc<Self>, package: &str) -> Ticker {
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(Arc::clone(self).run_ticker(package.to_string(), Arc::clone(&alive)));

        Ticker { alive }
    }

    async fn run_ticker(self: Arc<Self>, package: String, alive: Arc<AtomicBool>) {
        let period = self.settings.tick_interval;
        let Some(first) = Instant::now().checked_add(period) else {
            warn!("Tick interval {:?} is out of range, not counting {}", period, package);
            return;
        };
        let mut interval = time::interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !alive.load(Ordering::Acquire) {
                break;
            }

            let mut slot = self.slot.lock().await;
            // Cancellation happens under this lock; re-check before touching counters
            if !alive.load(Ordering::Acquire) {
                break;
            }

            match self.tick(&package) {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Stop) => {
                    slot.go_idle();
                    break;
                }
                Err(e) => warn!("Minute tick for {} failed, skipping: {:#}", package, e),
            }
        }

        debug!("Ticker for {} stopped", package);
    }

    fn tick(&self, package: &str) -> Result<TickOutcome> {
        let now = self.clock.now();
        let day = day_key(now);

        if !self.store.is_tracked(package)? {
            info!("{} is no longer tracked, stopping its ticker", package);
            return Ok(TickOutcome::Stop);
        }

        let minutes = self.store.increment_minutes(package, day)?;
        debug!("Minute {} for {}", minutes, package);

        let rule = self.store.rule(package)?;
        let counter = self.store.counter(package, day)?;

        if is_blocked_now(&counter, now) {
            // Blocked elsewhere, e.g. by a rule edit
            self.gate.show_block(package, &self.gate.reasons().limit);
            return Ok(TickOutcome::Stop);
        }

        if is_over_limit(&rule, &counter) {
            self.gate.block_until_midnight(package, now)?;
            if rule.notifications_enabled {
                self.gate.notify_limit_reached(package);
            }
            self.gate.show_block(package, &self.gate.reasons().limit);
            return Ok(TickOutcome::Stop);
        }

        Ok(TickOutcome::Continue)
    }
}
