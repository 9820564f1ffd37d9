use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::quota::clock::{Clock, day_key, next_midnight};
use crate::quota::evaluator::{is_blocked_now, is_over_limit};
use crate::quota::presenter::Presenter;
use crate::quota::store::QuotaStore;

/// Outcome of re-applying policy to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockChange {
    /// Newly blocked until the given instant
    Blocked(DateTime<Utc>),
    /// A block was lifted because the package is no longer over its limit
    Unblocked,
    Unchanged,
}

/// Texts shown with a block overlay
#[derive(Debug, Clone)]
pub struct BlockReasons {
    pub limit: String,
    pub allowance: String,
}

impl Default for BlockReasons {
    fn default() -> Self {
        Self {
            limit: "Daily limit reached".to_string(),
            allowance: "No active allowance".to_string(),
        }
    }
}

/// Turns policy decisions into persisted block state and presentation signals
pub struct BlockGate {
    store: Arc<dyn QuotaStore>,
    presenter: Arc<dyn Presenter>,
    clock: Arc<dyn Clock>,
    reasons: BlockReasons,
}

impl BlockGate {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        presenter: Arc<dyn Presenter>,
        clock: Arc<dyn Clock>,
        reasons: BlockReasons,
    ) -> Self {
        Self {
            store,
            presenter,
            clock,
            reasons,
        }
    }

    pub fn reasons(&self) -> &BlockReasons {
        &self.reasons
    }

    pub fn show_block(&self, package: &str, reason: &str) {
        self.presenter.show_block_overlay(package, reason);
    }

    pub fn dismiss_block(&self) {
        self.presenter.dismiss_block_overlay();
    }

    pub fn notify_limit_reached(&self, package: &str) {
        self.presenter.post_limit_reached_notification(package);
    }

    /// Mark `package` blocked until the local midnight following `now`
    pub fn block_until_midnight(&self, package: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let until = next_midnight(now);
        self.store
            .set_blocked_until(package, day_key(now), until)
            .with_context(|| format!("Failed to block {}", package))?;

        info!("Blocked {} until {}", package, until.format("%Y-%m-%d %H:%M:%S %Z"));
        Ok(until)
    }

    /// Re-derive the block state of `package` from its rule and today's usage
    ///
    /// Safe to call repeatedly; a second call without intervening changes
    /// returns [`BlockChange::Unchanged`].
    pub fn reevaluate(&self, package: &str) -> Result<BlockChange> {
        let now = self.clock.now();
        let day = day_key(now);

        let rule = self.store.rule(package)?;
        let counter = self.store.counter(package, day)?;

        let over = is_over_limit(&rule, &counter);
        let blocked = is_blocked_now(&counter, now);

        match (over, blocked) {
            (true, false) => Ok(BlockChange::Blocked(self.block_until_midnight(package, now)?)),
            (false, true) => {
                self.store
                    .clear_blocked(package, day)
                    .with_context(|| format!("Failed to unblock {}", package))?;
                info!("Unblocked {} (no longer over limit)", package);
                Ok(BlockChange::Unblocked)
            }
            _ => {
                debug!("Block state of {} unchanged (over={}, blocked={})", package, over, blocked);
                Ok(BlockChange::Unchanged)
            }
        }
    }

    /// Open an allowance window of `minutes` starting now
    pub fn start_allowance(&self, package: &str, minutes: u32) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let until = now + Duration::minutes(i64::from(minutes));

        self.store
            .set_allowance_until(package, day_key(now), until)
            .with_context(|| format!("Failed to start allowance for {}", package))?;

        info!("Allowance for {} open until {}", package, until.format("%H:%M:%S"));
        Ok(until)
    }

    pub fn clear_allowance(&self, package: &str) -> Result<()> {
        self.store
            .clear_allowance(package, day_key(self.clock.now()))
            .with_context(|| format!("Failed to clear allowance for {}", package))?;
        info!("Allowance cleared for {}", package);
        Ok(())
    }

    pub fn clear_block(&self, package: &str) -> Result<()> {
        self.store
            .clear_blocked(package, day_key(self.clock.now()))
            .with_context(|| format!("Failed to clear block for {}", package))?;
        info!("Block cleared for {}", package);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::state::{CountingMode, Rule};
    use crate::quota::testing::Fixture;

    fn gate(fx: &Fixture) -> BlockGate {
        BlockGate::new(
            fx.store.clone(),
            fx.presenter.clone(),
            fx.clock.clone(),
            BlockReasons::default(),
        )
    }

    #[test]
    fn test_reevaluate_blocks_when_over_limit() {
        let fx = Fixture::new();
        let gate = gate(&fx);
        fx.store.set_rule("com.game", Rule { minutes_limit: Some(2), ..Default::default() }).unwrap();
        fx.store.increment_minutes("com.game", fx.today()).unwrap();
        fx.store.increment_minutes("com.game", fx.today()).unwrap();

        let change = gate.reevaluate("com.game").unwrap();

        let midnight = next_midnight(fx.clock.now());
        assert_eq!(change, BlockChange::Blocked(midnight));
        assert_eq!(fx.counter("com.game").blocked_until, midnight.timestamp_millis());
    }

    #[test]
    fn test_reevaluate_is_idempotent() {
        let fx = Fixture::new();
        let gate = gate(&fx);
        fx.store.set_rule("com.game", Rule { access_limit: Some(1), ..Default::default() }).unwrap();
        fx.store.increment_accesses("com.game", fx.today()).unwrap();

        gate.reevaluate("com.game").unwrap();
        let once = fx.counter("com.game");

        assert_eq!(gate.reevaluate("com.game").unwrap(), BlockChange::Unchanged);
        assert_eq!(fx.counter("com.game"), once);
    }

    #[test]
    fn test_reevaluate_lifts_block_after_rule_relaxed() {
        let fx = Fixture::new();
        let gate = gate(&fx);
        fx.store.set_rule("com.game", Rule { minutes_limit: Some(1), ..Default::default() }).unwrap();
        fx.store.increment_minutes("com.game", fx.today()).unwrap();
        gate.reevaluate("com.game").unwrap();

        fx.store.set_rule("com.game", Rule { minutes_limit: Some(90), ..Default::default() }).unwrap();

        assert_eq!(gate.reevaluate("com.game").unwrap(), BlockChange::Unblocked);
        assert_eq!(fx.counter("com.game").blocked_until, 0);
        assert_eq!(gate.reevaluate("com.game").unwrap(), BlockChange::Unchanged);
    }

    #[test]
    fn test_allowance_window() {
        let fx = Fixture::new();
        let gate = gate(&fx);
        fx.store
            .set_rule("com.video", Rule { counting_mode: CountingMode::Allowance, ..Default::default() })
            .unwrap();

        let until = gate.start_allowance("com.video", 5).unwrap();

        assert_eq!(until, fx.clock.now() + Duration::minutes(5));
        assert_eq!(fx.counter("com.video").allowance_until, until.timestamp_millis());

        gate.clear_allowance("com.video").unwrap();
        assert_eq!(fx.counter("com.video").allowance_until, 0);
    }

    #[test]
    fn test_clear_block_is_manual_override() {
        let fx = Fixture::new();
        let gate = gate(&fx);
        fx.store.set_rule("com.game", Rule { minutes_limit: Some(0), ..Default::default() }).unwrap();
        gate.reevaluate("com.game").unwrap();

        gate.clear_block("com.game").unwrap();

        assert_eq!(fx.counter("com.game").blocked_until, 0);
    }

    #[test]
    fn test_store_failure_surfaces_without_changes() {
        let fx = Fixture::new();
        let gate = gate(&fx);
        fx.store.set_rule("com.game", Rule { minutes_limit: Some(0), ..Default::default() }).unwrap();

        fx.store.set_failing(true);
        assert!(gate.reevaluate("com.game").is_err());
        fx.store.set_failing(false);

        assert_eq!(fx.counter("com.game").blocked_until, 0);
    }
}
