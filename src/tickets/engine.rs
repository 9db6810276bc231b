//! Ticket lifecycle state machine.
//!
//! All workflow decisions funnel through [`apply`], a pure function from
//! `(state, action, actor)` to the effects a handler must persist. Handlers
//! do the I/O; this module owns the guards, so every transition rule is
//! testable without a database.

use crate::core::middleware::Role;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Workflow states, in lifecycle order. Ids match the seeded `statuses` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TicketStatus {
    Pending,
    InProgress,
    ApprovedByPimpinan,
    Completed,
    Closed,
}

impl TicketStatus {
    pub fn id(&self) -> i32 {
        match self {
            Self::Pending => 1,
            Self::InProgress => 2,
            Self::ApprovedByPimpinan => 3,
            Self::Completed => 4,
            Self::Closed => 5,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::InProgress),
            3 => Some(Self::ApprovedByPimpinan),
            4 => Some(Self::Completed),
            5 => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::ApprovedByPimpinan => "Approved by Pimpinan",
            Self::Completed => "Completed",
            Self::Closed => "Closed",
        }
    }

    /// Terminal states for reporting and rating eligibility.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Closed)
    }
}

/// The slice of a ticket the guards need to see.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub status: TicketStatus,
    pub requester_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub assigned_to_pimpinan_id: Option<Uuid>,
    pub staff_notified_at: Option<DateTime<Utc>>,
    pub pimpinan_approved_at: Option<DateTime<Utc>>,
    pub has_rating: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Assign { assignee: Uuid },
    NotifyPimpinan,
    ApprovePimpinan,
    CompleteByStaff,
    Escalate { target: Uuid },
    Rate,
}

/// What a successful transition asks the handler to persist. Timestamps are
/// stamped by the handler with a single `now` so one action never produces
/// two clock reads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Effects {
    pub new_status: Option<TicketStatus>,
    pub set_assigned_to: Option<Uuid>,
    pub stamp_staff_notified: bool,
    pub stamp_pimpinan_notified: bool,
    pub stamp_pimpinan_approved: bool,
    pub stamp_staff_completed: bool,
    pub stamp_resolved: bool,
    pub history_action: &'static str,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Guard(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
}

impl From<WorkflowError> for crate::core::error::ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Forbidden(msg) => Self::Authorization(msg.to_string()),
            WorkflowError::Guard(msg) => Self::State(msg.to_string()),
            WorkflowError::Conflict(msg) => Self::Conflict(msg.to_string()),
        }
    }
}

/// Apply one workflow action. Authorization is always checked before state
/// guards, so a caller failing both gets 403, not 400.
pub fn apply(state: &WorkflowState, action: Action, actor: &Actor) -> Result<Effects, WorkflowError> {
    match action {
        Action::Assign { assignee } => {
            let self_claim = actor.role == Role::StaffSupport && assignee == actor.id;
            let manager = matches!(actor.role, Role::Supervisor | Role::Admin);
            if !self_claim && !manager {
                return Err(WorkflowError::Forbidden(
                    "Only supervisors and admins may assign tickets to others",
                ));
            }
            if state.status.is_closed() {
                return Err(WorkflowError::Guard("Cannot assign a closed ticket"));
            }
            let first_assignment = state.assigned_to.is_none();
            Ok(Effects {
                new_status: (state.status == TicketStatus::Pending)
                    .then_some(TicketStatus::InProgress),
                set_assigned_to: Some(assignee),
                stamp_staff_notified: state.staff_notified_at.is_none(),
                history_action: if first_assignment {
                    "assigned"
                } else {
                    "reassigned"
                },
                ..Effects::default()
            })
        }
        Action::NotifyPimpinan => {
            if actor.role != Role::StaffSupport {
                return Err(WorkflowError::Forbidden(
                    "Only support staff may notify the pimpinan",
                ));
            }
            if state.assigned_to_pimpinan_id.is_none() {
                return Err(WorkflowError::Guard(
                    "Ticket has no pimpinan assigned to notify",
                ));
            }
            Ok(Effects {
                stamp_pimpinan_notified: true,
                history_action: "notified_pimpinan",
                ..Effects::default()
            })
        }
        Action::ApprovePimpinan => {
            if actor.role != Role::Pimpinan {
                return Err(WorkflowError::Forbidden(
                    "Only the pimpinan may approve tickets",
                ));
            }
            if state.pimpinan_approved_at.is_some() {
                return Err(WorkflowError::Guard("Ticket is already approved"));
            }
            Ok(Effects {
                new_status: Some(TicketStatus::ApprovedByPimpinan),
                stamp_pimpinan_approved: true,
                history_action: "approved_by_pimpinan",
                ..Effects::default()
            })
        }
        Action::CompleteByStaff => {
            if actor.role != Role::StaffSupport {
                return Err(WorkflowError::Forbidden(
                    "Only support staff may complete tickets",
                ));
            }
            if state.pimpinan_approved_at.is_none() {
                return Err(WorkflowError::Guard(
                    "Ticket cannot be completed before pimpinan approval",
                ));
            }
            Ok(Effects {
                new_status: Some(TicketStatus::Completed),
                stamp_staff_completed: true,
                stamp_resolved: true,
                history_action: "completed_by_staff",
                ..Effects::default()
            })
        }
        Action::Escalate { target } => {
            if actor.role != Role::StaffSupport {
                return Err(WorkflowError::Forbidden(
                    "Only support staff may escalate tickets",
                ));
            }
            if state.status.is_closed() {
                return Err(WorkflowError::Guard("Cannot escalate a closed ticket"));
            }
            Ok(Effects {
                set_assigned_to: Some(target),
                history_action: "escalated",
                ..Effects::default()
            })
        }
        Action::Rate => {
            if actor.id != state.requester_id {
                return Err(WorkflowError::Forbidden(
                    "Only the ticket requester may rate it",
                ));
            }
            if !state.status.is_closed() {
                return Err(WorkflowError::Guard(
                    "Ticket must be completed before it can be rated",
                ));
            }
            if state.has_rating {
                return Err(WorkflowError::Conflict("Ticket has already been rated"));
            }
            Ok(Effects {
                history_action: "rated",
                ..Effects::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> WorkflowState {
        WorkflowState {
            status: TicketStatus::Pending,
            requester_id: Uuid::new_v4(),
            assigned_to: None,
            assigned_to_pimpinan_id: None,
            staff_notified_at: None,
            pimpinan_approved_at: None,
            has_rating: false,
        }
    }

    fn actor(role: Role) -> Actor {
        Actor {
            id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn test_status_id_round_trip() {
        for status in [
            TicketStatus::Pending,
            TicketStatus::InProgress,
            TicketStatus::ApprovedByPimpinan,
            TicketStatus::Completed,
            TicketStatus::Closed,
        ] {
            assert_eq!(TicketStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(TicketStatus::from_id(99), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TicketStatus::Completed.is_closed());
        assert!(TicketStatus::Closed.is_closed());
        assert!(!TicketStatus::ApprovedByPimpinan.is_closed());
    }

    #[test]
    fn test_first_assignment_stamps_notification_and_starts_progress() {
        let state = base_state();
        let supervisor = actor(Role::Supervisor);
        let assignee = Uuid::new_v4();
        let effects = apply(&state, Action::Assign { assignee }, &supervisor).unwrap();
        assert_eq!(effects.set_assigned_to, Some(assignee));
        assert!(effects.stamp_staff_notified);
        assert_eq!(effects.new_status, Some(TicketStatus::InProgress));
        assert_eq!(effects.history_action, "assigned");
    }

    #[test]
    fn test_reassignment_keeps_notification_timestamp() {
        let mut state = base_state();
        state.status = TicketStatus::InProgress;
        state.assigned_to = Some(Uuid::new_v4());
        state.staff_notified_at = Some(Utc::now());
        let effects = apply(
            &state,
            Action::Assign {
                assignee: Uuid::new_v4(),
            },
            &actor(Role::Admin),
        )
        .unwrap();
        assert!(!effects.stamp_staff_notified);
        assert_eq!(effects.history_action, "reassigned");
    }

    #[test]
    fn test_staff_can_self_claim_but_not_assign_others() {
        let state = base_state();
        let staff = actor(Role::StaffSupport);
        assert!(apply(&state, Action::Assign { assignee: staff.id }, &staff).is_ok());
        let err = apply(
            &state,
            Action::Assign {
                assignee: Uuid::new_v4(),
            },
            &staff,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn test_notify_requires_assigned_pimpinan() {
        let state = base_state();
        let err = apply(&state, Action::NotifyPimpinan, &actor(Role::StaffSupport)).unwrap_err();
        assert!(matches!(err, WorkflowError::Guard(_)));

        let mut state = base_state();
        state.assigned_to_pimpinan_id = Some(Uuid::new_v4());
        let effects = apply(&state, Action::NotifyPimpinan, &actor(Role::StaffSupport)).unwrap();
        assert!(effects.stamp_pimpinan_notified);
    }

    #[test]
    fn test_approve_sets_status_and_rejects_double_approval() {
        let state = base_state();
        let effects = apply(&state, Action::ApprovePimpinan, &actor(Role::Pimpinan)).unwrap();
        assert_eq!(effects.new_status, Some(TicketStatus::ApprovedByPimpinan));
        assert!(effects.stamp_pimpinan_approved);

        let mut approved = base_state();
        approved.pimpinan_approved_at = Some(Utc::now());
        let err = apply(&approved, Action::ApprovePimpinan, &actor(Role::Pimpinan)).unwrap_err();
        assert!(matches!(err, WorkflowError::Guard(_)));
    }

    #[test]
    fn test_complete_requires_approval() {
        let state = base_state();
        let err = apply(&state, Action::CompleteByStaff, &actor(Role::StaffSupport)).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Guard("Ticket cannot be completed before pimpinan approval")
        );
    }

    #[test]
    fn test_complete_authorization_checked_before_state_guard() {
        // Both the role and the approval precondition fail; 403 must win.
        let state = base_state();
        let err = apply(&state, Action::CompleteByStaff, &actor(Role::Pengadu)).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn test_complete_after_approval_stamps_everything() {
        let mut state = base_state();
        state.status = TicketStatus::ApprovedByPimpinan;
        state.pimpinan_approved_at = Some(Utc::now());
        let effects = apply(&state, Action::CompleteByStaff, &actor(Role::StaffSupport)).unwrap();
        assert_eq!(effects.new_status, Some(TicketStatus::Completed));
        assert!(effects.stamp_staff_completed);
        assert!(effects.stamp_resolved);
    }

    #[test]
    fn test_rate_requester_only_and_terminal_only() {
        let mut state = base_state();
        state.status = TicketStatus::Completed;
        let stranger = actor(Role::Pengadu);
        assert!(matches!(
            apply(&state, Action::Rate, &stranger).unwrap_err(),
            WorkflowError::Forbidden(_)
        ));

        let requester = Actor {
            id: state.requester_id,
            role: Role::Pengadu,
        };
        assert!(apply(&state, Action::Rate, &requester).is_ok());

        state.status = TicketStatus::Pending;
        assert!(matches!(
            apply(&state, Action::Rate, &requester).unwrap_err(),
            WorkflowError::Guard(_)
        ));
    }

    #[test]
    fn test_second_rating_is_a_conflict() {
        let mut state = base_state();
        state.status = TicketStatus::Completed;
        state.has_rating = true;
        let requester = Actor {
            id: state.requester_id,
            role: Role::Pengadu,
        };
        assert!(matches!(
            apply(&state, Action::Rate, &requester).unwrap_err(),
            WorkflowError::Conflict(_)
        ));
    }

    #[test]
    fn test_escalate_rejects_closed_tickets() {
        let mut state = base_state();
        state.status = TicketStatus::Closed;
        let err = apply(
            &state,
            Action::Escalate {
                target: Uuid::new_v4(),
            },
            &actor(Role::StaffSupport),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Guard(_)));
    }
}
