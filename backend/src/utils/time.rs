use chrono::{DateTime, Utc};

/// Whole seconds between two instants, truncated toward zero. Negative when
/// `end` precedes `start`; callers treat that as clock skew.
pub fn duration_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds()
}

/// Minute-aligned window index used as the rate-limit counter key suffix.
pub fn minute_window(now: DateTime<Utc>) -> i64 {
    now.timestamp() / 60
}

/// Seconds until the current minute window rolls over.
pub fn seconds_until_next_window(now: DateTime<Utc>) -> u64 {
    (60 - (now.timestamp() % 60)) as u64
}

/// Overlap in seconds between two closed ranges; zero when disjoint.
pub fn overlap_seconds(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> i64 {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    (end - start).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn duration_is_exact_to_the_second() {
        let start = Utc::now();
        assert_eq!(duration_seconds(start, start + Duration::seconds(125)), 125);
        assert_eq!(duration_seconds(start, start), 0);
        assert!(duration_seconds(start, start - Duration::seconds(5)) < 0);
    }

    #[test]
    fn sub_second_remainders_truncate() {
        let start = Utc::now();
        let end = start + Duration::milliseconds(1999);
        assert_eq!(duration_seconds(start, end), 1);
    }

    #[test]
    fn window_rollover_is_within_a_minute() {
        let now = Utc::now();
        let remaining = seconds_until_next_window(now);
        assert!(remaining >= 1 && remaining <= 60);
    }

    #[test]
    fn overlap_of_disjoint_ranges_is_zero() {
        let t0 = Utc::now();
        let a = (t0, t0 + Duration::hours(1));
        let b = (t0 + Duration::hours(2), t0 + Duration::hours(3));
        assert_eq!(overlap_seconds(a.0, a.1, b.0, b.1), 0);
    }

    #[test]
    fn overlap_of_nested_ranges_is_inner_length() {
        let t0 = Utc::now();
        let outer = (t0, t0 + Duration::hours(4));
        let inner = (t0 + Duration::hours(1), t0 + Duration::hours(2));
        assert_eq!(
            overlap_seconds(outer.0, outer.1, inner.0, inner.1),
            3600
        );
    }
}
