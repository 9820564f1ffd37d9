use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};

/// Counters are keyed by the local calendar date
pub type DayKey = NaiveDate;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Local calendar day that `instant` falls on
pub fn day_key(instant: DateTime<Utc>) -> DayKey {
    instant.with_timezone(&Local).date_naive()
}

/// First instant of the local day following `instant`
///
/// Falls back to `instant + 24h` when the local midnight does not exist
/// (DST transitions at midnight) or the calendar runs out.
pub fn next_midnight(instant: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = instant + Duration::days(1);

    let Some(tomorrow) = day_key(instant).succ_opt() else {
        return fallback;
    };

    Local
        .from_local_datetime(&tomorrow.and_time(chrono::NaiveTime::MIN))
        .earliest()
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(fallback)
}

/// Epoch millis as persisted in counters (`0` means "unset")
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Convert a persisted epoch-millis value back to an instant
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}
