//! Quiet-hours window arithmetic.
//!
//! Windows are stored as `HH:MM` strings and interpreted in UTC. All math
//! is minute-of-day on `i64` Unix timestamps; an overnight window
//! (start > end) wraps across midnight.

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Parse an `HH:MM` string into minute-of-day. Returns `None` for
/// anything out of range or malformed.
pub fn parse_minute_of_day(hhmm: &str) -> Option<i64> {
    let (h, m) = hhmm.split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

/// Minute-of-day (UTC) for a Unix timestamp.
pub fn minute_of_day(unix_ts: i64) -> i64 {
    (unix_ts.rem_euclid(86_400)) / 60
}

/// Whether `minute` lies inside the `[start, end)` window, wrapping
/// across midnight when `start > end`.
pub fn in_window(start: i64, end: i64, minute: i64) -> bool {
    debug_assert!((0..MINUTES_PER_DAY).contains(&minute));
    if start <= end {
        start <= minute && minute < end
    } else {
        minute >= start || minute < end
    }
}

/// Whether a timeout at `unix_ts` falls inside the configured quiet
/// hours. Unparseable bounds disable suppression rather than guessing.
pub fn suppresses_alert(start: Option<&str>, end: Option<&str>, unix_ts: i64) -> bool {
    let (Some(start), Some(end)) = (start, end) else {
        return false;
    };
    let (Some(s), Some(e)) = (parse_minute_of_day(start), parse_minute_of_day(end)) else {
        return false;
    };
    in_window(s, e, minute_of_day(unix_ts))
}
