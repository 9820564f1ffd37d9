use chrono::{DateTime, Utc};

use crate::quota::clock::to_millis;
use crate::quota::state::{CountingMode, DailyCounter, Rule};

/// True once either configured limit has been reached
///
/// The boundary is inclusive: using exactly the limit is over it, and a
/// limit of zero is reached before any usage.
pub fn is_over_limit(rule: &Rule, counter: &DailyCounter) -> bool {
    let over_minutes = rule
        .minutes_limit
        .is_some_and(|limit| counter.minutes_used >= limit);
    let over_accesses = rule
        .access_limit
        .is_some_and(|limit| counter.accesses_used >= limit);

    over_minutes || over_accesses
}

pub fn is_blocked_now(counter: &DailyCounter, now: DateTime<Utc>) -> bool {
    counter.blocked_until > to_millis(now)
}

pub fn is_allowance_active(rule: &Rule, counter: &DailyCounter, now: DateTime<Utc>) -> bool {
    rule.counting_mode == CountingMode::Allowance && counter.allowance_until > to_millis(now)
}

/// Minutes left today, `None` when unlimited
pub fn remaining_minutes(rule: &Rule, counter: &DailyCounter) -> Option<u32> {
    rule.minutes_limit
        .map(|limit| limit.saturating_sub(counter.minutes_used))
}

/// Entries left today, `None` when unlimited
pub fn remaining_accesses(rule: &Rule, counter: &DailyCounter) -> Option<u32> {
    rule.access_limit
        .map(|limit| limit.saturating_sub(counter.accesses_used))
}
