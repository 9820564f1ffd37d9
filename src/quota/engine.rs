use anyhow::{Context, Result};
use chrono::{DateTime, Days, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::quota::clock::{Clock, DayKey, day_key};
use crate::quota::events::{ForegroundEvent, PackageFilter, Route};
use crate::quota::gate::{BlockChange, BlockGate, BlockReasons};
use crate::quota::presenter::Presenter;
use crate::quota::report::TodayReport;
use crate::quota::session::{SessionTracker, TrackerSettings, Transition};
use crate::quota::state::{DailyCounter, Rule};
use crate::quota::store::QuotaStore;

/// Everything the engine needs besides its collaborators
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub tracker: TrackerSettings,
    pub reasons: BlockReasons,
    pub filter: PackageFilter,
}

/// Quota engine façade
///
/// Owns the store, block gate and session tracker and is the only thing the
/// daemon and the CLI talk to.
pub struct QuotaEngine {
    store: Arc<dyn QuotaStore>,
    gate: Arc<BlockGate>,
    tracker: SessionTracker,
    filter: PackageFilter,
    clock: Arc<dyn Clock>,
}

impl QuotaEngine {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        presenter: Arc<dyn Presenter>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let gate = Arc::new(BlockGate::new(
            Arc::clone(&store),
            presenter,
            Arc::clone(&clock),
            settings.reasons,
        ));
        let tracker = SessionTracker::new(
            Arc::clone(&store),
            Arc::clone(&gate),
            Arc::clone(&clock),
            settings.tracker,
        );

        Self {
            store,
            gate,
            tracker,
            filter: settings.filter,
            clock,
        }
    }

    /// Foreground changed to `package`
    ///
    /// Returns `None` when the filter swallowed the event.
    pub async fn notify_foreground_changed(
        &self,
        package: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Transition>> {
        match self.filter.route(package) {
            Route::Ignore => {
                debug!("Ignoring foreground change to {}", package);
                Ok(None)
            }
            Route::Lost => {
                self.notify_foreground_lost(at).await;
                Ok(None)
            }
            Route::Track => self.tracker.on_foreground_change(package, at).await.map(Some),
        }
    }

    pub async fn notify_foreground_lost(&self, at: DateTime<Utc>) {
        debug!("Foreground lost");
        self.tracker.on_foreground_lost(at).await;
    }

    pub async fn notify_screen_off(&self) {
        debug!("Screen off");
        self.tracker.on_foreground_lost(self.clock.now()).await;
    }

    pub fn notify_screen_on(&self) {
        debug!("Screen on");
        self.tracker.on_screen_on(self.clock.now());
    }

    pub async fn handle_event(&self, event: ForegroundEvent) -> Result<()> {
        match event {
            ForegroundEvent::Changed { package, at } => {
                let at = at.unwrap_or_else(|| self.clock.now());
                self.notify_foreground_changed(&package, at).await?;
            }
            ForegroundEvent::Lost { at } => {
                self.notify_foreground_lost(at.unwrap_or_else(|| self.clock.now())).await;
            }
            ForegroundEvent::ScreenOff => self.notify_screen_off().await,
            ForegroundEvent::ScreenOn => self.notify_screen_on(),
        }
        Ok(())
    }

    /// Store `rule` and re-apply it to today's usage
    pub fn set_rule(&self, package: &str, rule: Rule) -> Result<BlockChange> {
        self.store
            .set_rule(package, rule)
            .with_context(|| format!("Failed to save rule for {}", package))?;
        info!("Rule saved for {}", package);

        self.gate.reevaluate(package)
    }

    /// Stop tracking `package` and drop today's counter
    pub async fn delete_package(&self, package: &str) -> Result<()> {
        self.store
            .delete_rule(package, self.today_key())
            .with_context(|| format!("Failed to delete {}", package))?;

        if self.tracker.release(package).await {
            self.gate.dismiss_block();
        }
        info!("Stopped tracking {}", package);
        Ok(())
    }

    /// Open an allowance window
    ///
    /// Without explicit `minutes` the rule's `allowance_minutes` is used.
    pub fn start_allowance(&self, package: &str, minutes: Option<u32>) -> Result<DateTime<Utc>> {
        let minutes = match minutes {
            Some(minutes) => minutes,
            None => self.rule(package)?.allowance_minutes.with_context(|| {
                format!("No allowance length given and {} has no default", package)
            })?,
        };

        if !self.store.is_tracked(package)? {
            warn!("Starting allowance for untracked package {}", package);
        }

        self.gate.start_allowance(package, minutes)
    }

    pub fn clear_allowance(&self, package: &str) -> Result<()> {
        self.gate.clear_allowance(package)
    }

    /// Lift today's block; usage stays, so a later re-evaluation may block again
    pub fn clear_block(&self, package: &str) -> Result<()> {
        self.gate.clear_block(package)
    }

    /// Zero today's usage of `package`, lifting any block with it
    pub fn reset_today(&self, package: &str) -> Result<()> {
        self.store
            .reset_counter(package, self.today_key())
            .with_context(|| format!("Failed to reset today's usage of {}", package))?;
        info!("Reset today's usage of {}", package);
        Ok(())
    }

    /// Drop counters older than `retain_days` days, today included
    pub fn prune_history(&self, retain_days: u32) -> Result<usize> {
        let today = self.today_key();
        let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(retain_days.saturating_sub(1)))) else {
            return Ok(0);
        };

        let pruned = self.store.prune_counters_before(cutoff)?;
        if pruned > 0 {
            info!("Pruned usage history before {} ({} days)", cutoff, pruned);
        }
        Ok(pruned)
    }

    pub fn rule(&self, package: &str) -> Result<Rule> {
        self.store.rule(package)
    }

    pub fn today(&self, package: &str) -> Result<DailyCounter> {
        self.store.counter(package, self.today_key())
    }

    pub fn report(&self) -> Result<TodayReport> {
        TodayReport::build(self.store.as_ref(), self.clock.now())
    }

    pub async fn current_package(&self) -> Option<String> {
        self.tracker.current_package().await
    }

    pub async fn shutdown(&self) {
        self.tracker.shutdown().await;
    }

    fn today_key(&self) -> DayKey {
        day_key(self.clock.now())
    }
}
