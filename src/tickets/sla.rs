//! SLA deadline arithmetic and breach classification.
//!
//! Deadlines are stamped exactly once, at ticket creation, from the active
//! policy for the ticket's priority. They are never recomputed, even when
//! the priority is edited later. Breach state is derived on read; nothing
//! about it is persisted.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

const RESPONSE_WARNING_WINDOW_HOURS: i64 = 2;
const RESOLUTION_WARNING_WINDOW_HOURS: i64 = 4;

#[derive(Debug, Clone, Copy)]
pub struct SlaPolicyHours {
    pub response_time_hours: i32,
    pub resolution_time_hours: i32,
}

/// Deadlines for a new ticket. No active policy means no SLA is tracked,
/// which is not an error.
pub fn compute_deadlines(
    policy: Option<SlaPolicyHours>,
    base: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match policy {
        Some(p) => (
            Some(base + Duration::hours(i64::from(p.response_time_hours))),
            Some(base + Duration::hours(i64::from(p.resolution_time_hours))),
        ),
        None => (None, None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaState {
    ResponseBreached,
    ResolutionBreached,
    ResponseWarning,
    ResolutionWarning,
    Normal,
}

/// Classify a ticket's SLA position at `now`. Breaches outrank warnings;
/// a recorded first response clears the response clock.
pub fn classify(
    response_due: Option<DateTime<Utc>>,
    resolution_due: Option<DateTime<Utc>>,
    first_response_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SlaState {
    if let Some(due) = response_due {
        if due < now && first_response_at.is_none() {
            return SlaState::ResponseBreached;
        }
    }
    if let Some(due) = resolution_due {
        if due < now {
            return SlaState::ResolutionBreached;
        }
    }
    if let Some(due) = response_due {
        if first_response_at.is_none()
            && due >= now
            && due - now <= Duration::hours(RESPONSE_WARNING_WINDOW_HOURS)
        {
            return SlaState::ResponseWarning;
        }
    }
    if let Some(due) = resolution_due {
        if due >= now && due - now <= Duration::hours(RESOLUTION_WARNING_WINDOW_HOURS) {
            return SlaState::ResolutionWarning;
        }
    }
    SlaState::Normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_deadlines_from_policy() {
        let base = at(8);
        let (response, resolution) = compute_deadlines(
            Some(SlaPolicyHours {
                response_time_hours: 4,
                resolution_time_hours: 24,
            }),
            base,
        );
        assert_eq!(response, Some(base + Duration::hours(4)));
        assert_eq!(resolution, Some(base + Duration::hours(24)));
    }

    #[test]
    fn test_no_policy_means_no_sla() {
        assert_eq!(compute_deadlines(None, at(8)), (None, None));
    }

    #[test]
    fn test_response_breach_requires_missing_first_response() {
        let now = at(12);
        let due = Some(at(10));
        assert_eq!(
            classify(due, Some(at(20)), None, now),
            SlaState::ResponseBreached
        );
        // First response recorded: the response clock no longer breaches.
        assert_eq!(
            classify(due, Some(at(20)), Some(at(9)), now),
            SlaState::Normal
        );
    }

    #[test]
    fn test_resolution_breach() {
        let now = at(12);
        assert_eq!(
            classify(None, Some(at(11)), None, now),
            SlaState::ResolutionBreached
        );
    }

    #[test]
    fn test_warning_windows() {
        let now = at(12);
        // Response due in 1h: inside the 2h window.
        assert_eq!(
            classify(Some(at(13)), Some(at(23)), None, now),
            SlaState::ResponseWarning
        );
        // Resolution due in 3h: inside the 4h window, response already made.
        assert_eq!(
            classify(Some(at(13)), Some(at(15)), Some(at(9)), now),
            SlaState::ResolutionWarning
        );
    }

    #[test]
    fn test_normal_when_far_from_deadlines() {
        let now = at(8);
        assert_eq!(
            classify(Some(at(12)), Some(at(23)), None, now),
            SlaState::Normal
        );
        assert_eq!(classify(None, None, None, now), SlaState::Normal);
    }
}
