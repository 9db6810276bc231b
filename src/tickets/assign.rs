//! Auto-assignment balancer: new tickets go to the least-loaded active
//! support staff member. Ties break on ascending user id so the pick is
//! deterministic and reproducible.

use crate::core::error::ApiError;
use crate::core::middleware::Role;
use crate::core::schema::{tickets, users};
use crate::tickets::engine::TicketStatus;
use diesel::prelude::*;
use uuid::Uuid;

/// Pure selection over `(user_id, open_ticket_count)` pairs.
pub fn pick_least_loaded(candidates: &[(Uuid, i64)]) -> Option<Uuid> {
    candidates
        .iter()
        .min_by_key(|(id, count)| (*count, *id))
        .map(|(id, _)| *id)
}

/// Pick an assignee for a new ticket, or `None` when no active support
/// staff exists (the ticket stays unassigned, which is not an error).
pub fn auto_assign(conn: &mut PgConnection) -> Result<Option<Uuid>, ApiError> {
    let staff_ids: Vec<Uuid> = users::table
        .filter(users::role.eq(Role::StaffSupport.as_str()))
        .filter(users::is_active.eq(true))
        .select(users::id)
        .order(users::id.asc())
        .load(conn)?;

    if staff_ids.is_empty() {
        return Ok(None);
    }

    let open_statuses = [TicketStatus::Pending.id(), TicketStatus::InProgress.id()];
    let mut candidates = Vec::with_capacity(staff_ids.len());
    for staff_id in staff_ids {
        let open_count: i64 = tickets::table
            .filter(tickets::assigned_to.eq(staff_id))
            .filter(tickets::status_id.eq_any(open_statuses))
            .count()
            .get_result(conn)?;
        candidates.push((staff_id, open_count));
    }

    Ok(pick_least_loaded(&candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    #[test]
    fn test_picks_minimum_open_count() {
        let a = uuid(1);
        let b = uuid(2);
        let candidates = vec![(a, 2), (b, 0)];
        assert_eq!(pick_least_loaded(&candidates), Some(b));
    }

    #[test]
    fn test_tie_breaks_on_ascending_id() {
        let low = uuid(1);
        let high = uuid(9);
        // Same load either way the input is ordered.
        assert_eq!(pick_least_loaded(&[(high, 1), (low, 1)]), Some(low));
        assert_eq!(pick_least_loaded(&[(low, 1), (high, 1)]), Some(low));
    }

    #[test]
    fn test_empty_candidate_list_yields_none() {
        assert_eq!(pick_least_loaded(&[]), None);
    }
}
