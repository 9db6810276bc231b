//! Aggregation arithmetic for the reporting layer. All pure: handlers load
//! rows and feed them through here. Percentages are rounded to 2 decimal
//! places and empty denominators yield 0, never an error.

use uuid::Uuid;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `resolved / total` as a percentage; 0 when no tickets were created in
/// the period.
pub fn resolution_rate(resolved: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(resolved as f64 / total as f64 * 100.0)
}

pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Average of durations (seconds) expressed in hours; 0 for an empty set.
pub fn average_hours(duration_seconds: &[i64]) -> f64 {
    if duration_seconds.is_empty() {
        return 0.0;
    }
    let total: i64 = duration_seconds.iter().sum();
    round2(total as f64 / duration_seconds.len() as f64 / 3600.0)
}

/// Resolved-ticket counts per staff member, descending, top five. Ties
/// break on ascending user id so the ranking is stable.
pub fn top_performers(mut counts: Vec<(Uuid, i64)>) -> Vec<(Uuid, i64)> {
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    counts.truncate(5);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    #[test]
    fn test_resolution_rate_rounds_to_two_decimals() {
        assert_eq!(resolution_rate(3, 10), 30.0);
        assert_eq!(resolution_rate(1, 3), 33.33);
        assert_eq!(resolution_rate(2, 3), 66.67);
    }

    #[test]
    fn test_zero_denominators_yield_zero() {
        assert_eq!(resolution_rate(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(average_hours(&[]), 0.0);
    }

    #[test]
    fn test_average_hours() {
        // 1h and 3h resolve times average to 2h.
        assert_eq!(average_hours(&[3600, 10800]), 2.0);
        assert_eq!(average_hours(&[5400]), 1.5);
    }

    #[test]
    fn test_top_performers_ranks_and_truncates() {
        let counts = vec![
            (uuid(1), 2),
            (uuid(2), 9),
            (uuid(3), 4),
            (uuid(4), 4),
            (uuid(5), 1),
            (uuid(6), 7),
        ];
        let top = top_performers(counts);
        assert_eq!(top.len(), 5);
        assert_eq!(top[0], (uuid(2), 9));
        assert_eq!(top[1], (uuid(6), 7));
        // Equal counts rank by ascending id.
        assert_eq!(top[2], (uuid(3), 4));
        assert_eq!(top[3], (uuid(4), 4));
    }
}
