use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::quota::clock::DayKey;
use crate::quota::state::{DailyCounter, QuotaState, Rule, STATE_VERSION};

/// Snapshot of the tracked package index
pub type TrackedPackages = Arc<BTreeSet<String>>;

/// Durable storage of rules, daily counters and the tracked package index
///
/// Every mutation is durable before it returns. Increments are atomic per
/// key, so concurrent callers never lose updates.
pub trait QuotaStore: Send + Sync {
    /// Rule for `package`, or the default rule when none is stored
    fn rule(&self, package: &str) -> Result<Rule>;

    /// Upsert the rule and add `package` to the tracked index
    fn set_rule(&self, package: &str, rule: Rule) -> Result<()>;

    /// Remove the rule, `day`'s counter and the index entry. Idempotent.
    fn delete_rule(&self, package: &str, day: DayKey) -> Result<()>;

    /// Counter for `package` on `day`, all-zero when absent
    fn counter(&self, package: &str, day: DayKey) -> Result<DailyCounter>;

    /// Add one minute, returning the new total
    fn increment_minutes(&self, package: &str, day: DayKey) -> Result<u32>;

    /// Add one access, returning the new total
    fn increment_accesses(&self, package: &str, day: DayKey) -> Result<u32>;

    fn set_blocked_until(&self, package: &str, day: DayKey, until: DateTime<Utc>) -> Result<()>;

    fn clear_blocked(&self, package: &str, day: DayKey) -> Result<()>;

    fn set_allowance_until(&self, package: &str, day: DayKey, until: DateTime<Utc>) -> Result<()>;

    fn clear_allowance(&self, package: &str, day: DayKey) -> Result<()>;

    /// Zero `day`'s counter for `package`
    fn reset_counter(&self, package: &str, day: DayKey) -> Result<()>;

    /// Drop counters of days before `day`, returning how many days went
    fn prune_counters_before(&self, day: DayKey) -> Result<usize>;

    /// Latest snapshot of the tracked package index
    fn tracked_packages(&self) -> Result<TrackedPackages>;

    fn is_tracked(&self, package: &str) -> Result<bool> {
        Ok(self.tracked_packages()?.contains(package))
    }
}

/// Apply a change to a copy of `state`, persist it, then publish it
///
/// Shared by both store implementations so the read-modify-write path is
/// identical. `persist` failing leaves `state` untouched.
fn commit<T>(
    state: &mut QuotaState,
    index: &RwLock<TrackedPackages>,
    persist: impl FnOnce(&QuotaState) -> Result<()>,
    change: impl FnOnce(&mut QuotaState) -> T,
) -> Result<T> {
    let mut next = state.clone();
    let out = change(&mut next);
    persist(&next)?;

    if next.tracked != state.tracked {
        publish_index(index, &next);
    }
    *state = next;

    Ok(out)
}

fn publish_index(index: &RwLock<TrackedPackages>, state: &QuotaState) {
    let snapshot = Arc::new(state.tracked.clone());
    match index.write() {
        Ok(mut guard) => *guard = snapshot,
        Err(poisoned) => *poisoned.into_inner() = snapshot,
    }
}

fn read_index(index: &RwLock<TrackedPackages>) -> TrackedPackages {
    match index.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// In-process store with no persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<QuotaState>,
    index: RwLock<TrackedPackages>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(&self, change: impl FnOnce(&mut QuotaState) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Quota state lock poisoned"))?;
        commit(&mut state, &self.index, |_| Ok(()), change)
    }

    fn read<T>(&self, view: impl FnOnce(&QuotaState) -> T) -> Result<T> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Quota state lock poisoned"))?;
        Ok(view(&state))
    }
}

/// Store backed by a single versioned JSON document
///
/// Reads re-load the file so edits made by another process are picked up;
/// writes go through [`atomic_write`](crate::platform::common::atomic_write).
/// An advisory lock on a sibling `<name>.lock` file serializes writers across
/// processes: updates hold it exclusively from load to rename, reads share it.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<QuotaState>,
    index: RwLock<TrackedPackages>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating an empty document on first write
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = load_document(&path)?;
        let index = RwLock::new(Arc::new(state.tracked.clone()));

        debug!(
            "Opened quota store at {} ({} tracked packages)",
            path.display(),
            state.tracked.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the cached document, take the file lock, and bring the cache up
    /// to date with the file
    ///
    /// The returned [`File`] holds the file lock until dropped.
    fn refreshed(
        &self,
        lock: FileLock,
    ) -> Result<(std::sync::MutexGuard<'_, QuotaState>, File)> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Quota state lock poisoned"))?;

        let guard = lock_document(&self.path, lock)?;

        let latest = load_document(&self.path)?;
        if latest.tracked != state.tracked {
            publish_index(&self.index, &latest);
        }
        *state = latest;

        Ok((state, guard))
    }

    fn update<T>(&self, change: impl FnOnce(&mut QuotaState) -> T) -> Result<T> {
        let (mut state, _guard) = self.refreshed(FileLock::Exclusive)?;
        commit(&mut state, &self.index, |next| save_document(&self.path, next), change)
    }

    fn read<T>(&self, view: impl FnOnce(&QuotaState) -> T) -> Result<T> {
        let (state, _guard) = self.refreshed(FileLock::Shared)?;
        Ok(view(&state))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileLock {
    Shared,
    Exclusive,
}

/// Lock file guarding the document at `path`
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Block until the advisory lock for the document at `path` is held
fn lock_document(path: &Path, lock: FileLock) -> Result<File> {
    if let Some(parent) = path.parent() {
        crate::platform::common::ensure_directory_exists(parent)?;
    }

    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    match lock {
        FileLock::Shared => FileExt::lock_shared(&file),
        FileLock::Exclusive => FileExt::lock_exclusive(&file),
    }
    .with_context(|| format!("Failed to lock quota state file: {}", path.display()))?;

    Ok(file)
}

/// Load the document at `path`; a missing file is an empty store
fn load_document(path: &Path) -> Result<QuotaState> {
    if !path.exists() {
        return Ok(QuotaState::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read quota state file: {}", path.display()))?;

    let state: QuotaState = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse quota state file: {}", path.display()))?;

    if state.version != STATE_VERSION {
        anyhow::bail!(
            "Quota state file version mismatch (expected {}, got {}): {}",
            STATE_VERSION,
            state.version,
            path.display()
        );
    }

    Ok(state)
}

fn save_document(path: &Path, state: &QuotaState) -> Result<()> {
    let content = serde_json::to_string_pretty(state)
        .context("Failed to serialize quota state")?;

    crate::platform::common::atomic_write(path, content.as_bytes())
        .with_context(|| format!("Failed to write quota state file: {}", path.display()))
        .inspect_err(|e| warn!("{:#}", e))
}

/// Implements [`QuotaStore`] in terms of the type's `read`/`update` helpers
macro_rules! impl_quota_store {
    ($store:ty) => {
        impl QuotaStore for $store {
            fn rule(&self, package: &str) -> Result<Rule> {
                self.read(|s| s.rule(package))
            }

            fn set_rule(&self, package: &str, rule: Rule) -> Result<()> {
                self.update(|s| s.set_rule(package, rule))
            }

            fn delete_rule(&self, package: &str, day: DayKey) -> Result<()> {
                self.update(|s| s.delete_rule(package, day))
            }

            fn counter(&self, package: &str, day: DayKey) -> Result<DailyCounter> {
                self.read(|s| s.counter(package, day))
            }

            fn increment_minutes(&self, package: &str, day: DayKey) -> Result<u32> {
                self.update(|s| {
                    let counter = s.counter_mut(package, day);
                    counter.minutes_used = counter.minutes_used.saturating_add(1);
                    counter.minutes_used
                })
            }

            fn increment_accesses(&self, package: &str, day: DayKey) -> Result<u32> {
                self.update(|s| {
                    let counter = s.counter_mut(package, day);
                    counter.accesses_used = counter.accesses_used.saturating_add(1);
                    counter.accesses_used
                })
            }

            fn set_blocked_until(
                &self,
                package: &str,
                day: DayKey,
                until: DateTime<Utc>,
            ) -> Result<()> {
                self.update(|s| s.counter_mut(package, day).block_until(until))
            }

            fn clear_blocked(&self, package: &str, day: DayKey) -> Result<()> {
                self.update(|s| s.counter_mut(package, day).blocked_until = 0)
            }

            fn set_allowance_until(
                &self,
                package: &str,
                day: DayKey,
                until: DateTime<Utc>,
            ) -> Result<()> {
                self.update(|s| s.counter_mut(package, day).allow_until(until))
            }

            fn clear_allowance(&self, package: &str, day: DayKey) -> Result<()> {
                self.update(|s| s.counter_mut(package, day).allowance_until = 0)
            }

            fn reset_counter(&self, package: &str, day: DayKey) -> Result<()> {
                self.update(|s| s.remove_counter(package, day))
            }

            fn prune_counters_before(&self, day: DayKey) -> Result<usize> {
                self.update(|s| s.prune_counters_before(day))
            }

            fn tracked_packages(&self) -> Result<TrackedPackages> {
                self.read(|_| ())?;
                Ok(read_index(&self.index))
            }
        }
    };
}

impl_quota_store!(MemoryStore);
impl_quota_store!(JsonFileStore);
