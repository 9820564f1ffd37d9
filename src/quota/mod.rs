//! Per-application usage quotas
//!
//! This module provides functionality to:
//! - Store per-app rules and per-day usage counters
//! - Track which app is in the foreground and count minutes and entries
//! - Block apps whose daily quota is spent until local midnight
//! - Open time-boxed allowance windows for allowance-mode apps

pub mod clock;
pub mod engine;
pub mod evaluator;
pub mod events;
pub mod gate;
pub mod presenter;
pub mod report;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, DayKey, SystemClock};
pub use engine::{EngineSettings, QuotaEngine};
pub use events::{ForegroundEvent, PackageFilter};
pub use gate::{BlockChange, BlockGate, BlockReasons};
pub use presenter::{DesktopPresenter, LogPresenter, Presenter};
pub use report::{AppToday, TodayReport};
pub use session::{SessionTracker, TrackerSettings, Transition};
pub use state::{CountingMode, DailyCounter, QuotaState, Rule};
pub use store::{JsonFileStore, MemoryStore, QuotaStore};
