//! Event timestamps.
//!
//! Events carry the wall-clock time they were created at. Within a single
//! process two events must never share a timestamp and a later event must
//! never appear earlier, otherwise elapsed-time integration on items would
//! see zero or negative intervals. `next_timestamp` enforces that by
//! bumping the clock by one microsecond whenever the system clock stalls or
//! steps backwards.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

static LAST_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Returns a timestamp strictly greater than every timestamp previously
/// returned by this function in the current process.
///
/// # Examples
///
/// ```
/// use trackgraph::time::next_timestamp;
///
/// let a = next_timestamp();
/// let b = next_timestamp();
/// assert!(b > a);
/// ```
#[must_use]
pub fn next_timestamp() -> DateTime<Utc> {
    let wall = Utc::now().timestamp_micros();
    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let candidate = if wall > last { wall } else { last + 1 };
        match LAST_MICROS.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return from_micros(candidate),
            Err(observed) => last = observed,
        }
    }
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Milliseconds elapsed between `from` and `to`.
///
/// Negative when `to` precedes `from`; callers decide how to treat that.
#[must_use]
pub fn elapsed_millis(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn timestamps_strictly_increase() {
        let mut prev = next_timestamp();
        for _ in 0..1_000 {
            let next = next_timestamp();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn timestamps_increase_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| next_timestamp()).collect::<Vec<_>>()))
            .collect();

        let mut all: Vec<DateTime<Utc>> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "no two timestamps may collide");
    }

    #[test]
    fn elapsed_millis_signs() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(3_000);
        assert_eq!(elapsed_millis(t0, t1), 3_000);
        assert_eq!(elapsed_millis(t1, t0), -3_000);
        assert_eq!(elapsed_millis(t0, t0), 0);
    }
}
