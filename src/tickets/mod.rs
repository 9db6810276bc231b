pub mod assign;
pub mod engine;
pub mod history;
pub mod number;
pub mod sla;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::ApiError;
use crate::core::middleware::{AuthenticatedUser, Role, User};
use crate::core::schema::{
    categories, priorities, sla_policies, ticket_attachments, ticket_comments, ticket_ratings,
    tickets, users,
};
use crate::core::state::AppState;
use engine::{Action, Actor, Effects, TicketStatus, WorkflowState};
use sla::{SlaPolicyHours, SlaState};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub title: String,
    pub description: String,
    pub problem_detail: Option<String>,
    pub completion_notes: Option<String>,
    pub category_id: i32,
    pub priority_id: i32,
    pub status_id: i32,
    pub requester_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub assigned_to_pimpinan_id: Option<Uuid>,
    pub staff_notified_at: Option<DateTime<Utc>>,
    pub pimpinan_notified_at: Option<DateTime<Utc>>,
    pub pimpinan_approved_at: Option<DateTime<Utc>>,
    pub staff_completed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub sla_response_due: Option<DateTime<Utc>>,
    pub sla_resolution_due: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn status(&self) -> Result<TicketStatus, ApiError> {
        TicketStatus::from_id(self.status_id)
            .ok_or_else(|| ApiError::Internal(format!("Unknown status id: {}", self.status_id)))
    }

    pub fn sla_state(&self, now: DateTime<Utc>) -> SlaState {
        sla::classify(
            self.sla_response_due,
            self.sla_resolution_due,
            self.first_response_at,
            now,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_comments)]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub comment: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_attachments)]
pub struct TicketAttachment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_ratings)]
pub struct TicketRating {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    pub problem_detail: Option<String>,
    pub category_id: i32,
    pub priority_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub problem_detail: Option<String>,
    pub category_id: Option<i32>,
    pub priority_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub assignee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct NotifyPimpinanRequest {
    pub pimpinan_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteTicketRequest {
    pub completion_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub comment: String,
    pub is_internal: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAttachmentRequest {
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
}

#[derive(Debug, Deserialize)]
pub struct RateTicketRequest {
    pub rating: i32,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub ticket_id: Uuid,
    pub target_user_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub ticket_id: Uuid,
    pub assignee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct BulkAssignRequest {
    pub ticket_ids: Vec<Uuid>,
    pub assignee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub ticket_ids: Vec<Uuid>,
    pub status_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct CheckTicketRequest {
    pub ticket_number: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status_id: Option<i32>,
    pub priority_id: Option<i32>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TicketDetail {
    pub ticket: Ticket,
    pub sla_state: SlaState,
}

#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub updated: usize,
}

#[derive(Debug, Serialize)]
pub struct PublicTicketStatus {
    pub ticket_number: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

fn load_ticket(conn: &mut PgConnection, id: Uuid) -> Result<Ticket, ApiError> {
    tickets::table
        .filter(tickets::id.eq(id))
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".to_string()))
}

fn has_rating(conn: &mut PgConnection, ticket_id: Uuid) -> Result<bool, ApiError> {
    let count: i64 = ticket_ratings::table
        .filter(ticket_ratings::ticket_id.eq(ticket_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

fn workflow_state(ticket: &Ticket, has_rating: bool) -> Result<WorkflowState, ApiError> {
    Ok(WorkflowState {
        status: ticket.status()?,
        requester_id: ticket.requester_id,
        assigned_to: ticket.assigned_to,
        assigned_to_pimpinan_id: ticket.assigned_to_pimpinan_id,
        staff_notified_at: ticket.staff_notified_at,
        pimpinan_approved_at: ticket.pimpinan_approved_at,
        has_rating,
    })
}

fn snapshot(ticket: &Ticket) -> serde_json::Value {
    serde_json::to_value(ticket).unwrap_or(serde_json::Value::Null)
}

/// Whether the caller may see this ticket at all. Requesters see their own
/// tickets; staff see tickets assigned to them plus the unassigned pool;
/// supervisors, admins and the pimpinan see everything.
fn can_view(ticket: &Ticket, user: &AuthenticatedUser) -> bool {
    match user.role {
        Role::Admin | Role::Supervisor | Role::Pimpinan => true,
        Role::Pengadu => ticket.requester_id == user.id(),
        Role::StaffSupport => {
            ticket.assigned_to == Some(user.id()) || ticket.assigned_to.is_none()
        }
    }
}

fn load_active_user(conn: &mut PgConnection, id: Uuid) -> Result<User, ApiError> {
    let user: User = users::table
        .filter(users::id.eq(id))
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    if !user.is_active {
        return Err(ApiError::validation("assignee_id", "User is not active."));
    }
    Ok(user)
}

/// The ticket as it must look once a transition's effects are applied,
/// every stamp taken from the same `now` so one action never reads the
/// clock twice.
fn merge_effects(before: &Ticket, effects: &Effects, now: DateTime<Utc>) -> Ticket {
    let mut after = before.clone();
    if let Some(status) = effects.new_status {
        after.status_id = status.id();
    }
    if let Some(assignee) = effects.set_assigned_to {
        after.assigned_to = Some(assignee);
    }
    if effects.stamp_staff_notified {
        after.staff_notified_at = Some(now);
    }
    if effects.stamp_pimpinan_notified {
        after.pimpinan_notified_at = Some(now);
    }
    if effects.stamp_pimpinan_approved {
        after.pimpinan_approved_at = Some(now);
    }
    if effects.stamp_staff_completed {
        after.staff_completed_at = Some(now);
    }
    if effects.stamp_resolved {
        after.resolved_at = Some(now);
    }
    after.updated_at = now;
    after
}

/// Persist the effects of a successful workflow transition and append the
/// matching history row. All fields go out in one UPDATE and the history
/// INSERT rides the same transaction, so a failure can never leave a
/// half-transitioned ticket or a transition without its audit row.
fn apply_effects(
    conn: &mut PgConnection,
    before: &Ticket,
    effects: &Effects,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Ticket, ApiError> {
    let merged = merge_effects(before, effects, now);
    conn.transaction::<Ticket, ApiError, _>(|conn| {
        diesel::update(tickets::table.filter(tickets::id.eq(before.id)))
            .set((
                tickets::status_id.eq(merged.status_id),
                tickets::assigned_to.eq(merged.assigned_to),
                tickets::staff_notified_at.eq(merged.staff_notified_at),
                tickets::pimpinan_notified_at.eq(merged.pimpinan_notified_at),
                tickets::pimpinan_approved_at.eq(merged.pimpinan_approved_at),
                tickets::staff_completed_at.eq(merged.staff_completed_at),
                tickets::resolved_at.eq(merged.resolved_at),
                tickets::updated_at.eq(merged.updated_at),
            ))
            .execute(conn)?;
        let after = load_ticket(conn, before.id)?;
        history::record(
            conn,
            before.id,
            actor_id,
            effects.history_action,
            snapshot(before),
            snapshot(&after),
        )?;
        Ok(after)
    })
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<TicketDetail>), ApiError> {
    user.require(&[Role::Pengadu])?;
    let mut conn = state.db()?;

    if req.title.trim().is_empty() {
        return Err(ApiError::validation("title", "The title field is required."));
    }
    if req.description.trim().is_empty() {
        return Err(ApiError::validation(
            "description",
            "The description field is required.",
        ));
    }
    let category_ok: i64 = categories::table
        .filter(categories::id.eq(req.category_id))
        .filter(categories::is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    if category_ok == 0 {
        return Err(ApiError::validation(
            "category_id",
            "The selected category is invalid.",
        ));
    }
    let priority_ok: i64 = priorities::table
        .filter(priorities::id.eq(req.priority_id))
        .count()
        .get_result(&mut conn)?;
    if priority_ok == 0 {
        return Err(ApiError::validation(
            "priority_id",
            "The selected priority is invalid.",
        ));
    }

    let now = Utc::now();
    // Number allocation, the insert, and the `created` history row commit
    // together or not at all.
    let ticket = conn.transaction::<Ticket, ApiError, _>(|conn| {
        let ticket_number = number::next_ticket_number(conn)?;
        let assigned_to = assign::auto_assign(conn)?;

        let policy: Option<SlaPolicyHours> = sla_policies::table
            .filter(sla_policies::priority_id.eq(req.priority_id))
            .filter(sla_policies::is_active.eq(true))
            .select((
                sla_policies::response_time_hours,
                sla_policies::resolution_time_hours,
            ))
            .first::<(i32, i32)>(conn)
            .optional()?
            .map(|(response_time_hours, resolution_time_hours)| SlaPolicyHours {
                response_time_hours,
                resolution_time_hours,
            });
        let (sla_response_due, sla_resolution_due) = sla::compute_deadlines(policy, now);

        let ticket = Ticket {
            id: Uuid::new_v4(),
            ticket_number,
            title: req.title,
            description: req.description,
            problem_detail: req.problem_detail,
            completion_notes: None,
            category_id: req.category_id,
            priority_id: req.priority_id,
            status_id: TicketStatus::Pending.id(),
            requester_id: user.id(),
            assigned_to,
            assigned_to_pimpinan_id: None,
            staff_notified_at: None,
            pimpinan_notified_at: None,
            pimpinan_approved_at: None,
            staff_completed_at: None,
            resolved_at: None,
            first_response_at: None,
            sla_response_due,
            sla_resolution_due,
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(conn)?;
        history::record(
            conn,
            ticket.id,
            user.id(),
            "created",
            serde_json::Value::Null,
            snapshot(&ticket),
        )?;
        Ok(ticket)
    })?;
    tracing::info!(ticket_number = %ticket.ticket_number, "ticket created");

    let sla_state = ticket.sla_state(now);
    Ok((
        StatusCode::CREATED,
        Json(TicketDetail { ticket, sla_state }),
    ))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TicketDetail>>, ApiError> {
    let mut conn = state.db()?;
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = tickets::table.into_boxed();
    match user.role {
        Role::Pengadu => q = q.filter(tickets::requester_id.eq(user.id())),
        Role::StaffSupport => {
            q = q.filter(
                tickets::assigned_to
                    .eq(user.id())
                    .or(tickets::assigned_to.is_null()),
            )
        }
        Role::Admin | Role::Supervisor | Role::Pimpinan => {}
    }
    if let Some(status_id) = query.status_id {
        q = q.filter(tickets::status_id.eq(status_id));
    }
    if let Some(priority_id) = query.priority_id {
        q = q.filter(tickets::priority_id.eq(priority_id));
    }
    if let Some(assigned_to) = query.assigned_to {
        q = q.filter(tickets::assigned_to.eq(assigned_to));
    }
    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            tickets::title
                .ilike(pattern.clone())
                .or(tickets::description.ilike(pattern.clone()))
                .or(tickets::ticket_number.ilike(pattern)),
        );
    }

    let rows: Vec<Ticket> = q
        .order(tickets::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    let now = Utc::now();
    let details = rows
        .into_iter()
        .map(|ticket| {
            let sla_state = ticket.sla_state(now);
            TicketDetail { ticket, sla_state }
        })
        .collect();
    Ok(Json(details))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketDetail>, ApiError> {
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, id)?;
    if !can_view(&ticket, &user) {
        return Err(ApiError::Authorization(
            "You do not have access to this ticket".to_string(),
        ));
    }
    let sla_state = ticket.sla_state(Utc::now());
    Ok(Json(TicketDetail { ticket, sla_state }))
}

/// Content and classification edits. SLA deadlines are deliberately left
/// untouched even when the priority changes; they are stamped once at
/// creation and never recomputed.
pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<TicketDetail>, ApiError> {
    let mut conn = state.db()?;
    let before = load_ticket(&mut conn, id)?;

    let owner = before.requester_id == user.id();
    let manager = matches!(user.role, Role::Admin | Role::Supervisor);
    if !owner && !manager {
        return Err(ApiError::Authorization(
            "You may only edit your own tickets".to_string(),
        ));
    }
    if before.status()?.is_closed() {
        return Err(ApiError::State("Cannot edit a closed ticket".to_string()));
    }

    let now = Utc::now();
    let title = req.title.unwrap_or_else(|| before.title.clone());
    let description = req.description.unwrap_or_else(|| before.description.clone());
    let problem_detail = req.problem_detail.or_else(|| before.problem_detail.clone());
    let (category_id, priority_id) = if manager {
        (
            req.category_id.unwrap_or(before.category_id),
            req.priority_id.unwrap_or(before.priority_id),
        )
    } else {
        (before.category_id, before.priority_id)
    };

    let after = conn.transaction::<Ticket, ApiError, _>(|conn| {
        diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set((
                tickets::title.eq(title),
                tickets::description.eq(description),
                tickets::problem_detail.eq(problem_detail),
                tickets::category_id.eq(category_id),
                tickets::priority_id.eq(priority_id),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;
        let after = load_ticket(conn, id)?;
        history::record(
            conn,
            id,
            user.id(),
            "updated",
            snapshot(&before),
            snapshot(&after),
        )?;
        Ok(after)
    })?;
    let sla_state = after.sla_state(now);
    Ok(Json(TicketDetail {
        ticket: after,
        sla_state,
    }))
}

/// Hard delete, admin only. Comments, attachments, ratings and history
/// rows go with the ticket via the cascade.
pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    user.require(&[Role::Admin])?;
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, id)?;

    diesel::delete(tickets::table.filter(tickets::id.eq(id))).execute(&mut conn)?;
    tracing::info!(ticket_number = %ticket.ticket_number, "ticket deleted");
    Ok(Json(serde_json::json!({ "message": "Ticket deleted." })))
}

pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignTicketRequest>,
) -> Result<Json<TicketDetail>, ApiError> {
    let mut conn = state.db()?;
    let before = load_ticket(&mut conn, id)?;
    let rated = has_rating(&mut conn, id)?;

    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    let effects = engine::apply(
        &workflow_state(&before, rated)?,
        Action::Assign {
            assignee: req.assignee_id,
        },
        &actor,
    )?;
    load_active_user(&mut conn, req.assignee_id)?;

    let now = Utc::now();
    let after = apply_effects(&mut conn, &before, &effects, user.id(), now)?;
    let sla_state = after.sla_state(now);
    Ok(Json(TicketDetail {
        ticket: after,
        sla_state,
    }))
}

pub async fn notify_pimpinan(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<NotifyPimpinanRequest>,
) -> Result<Json<TicketDetail>, ApiError> {
    user.require(&[Role::StaffSupport])?;
    let mut conn = state.db()?;
    let mut before = load_ticket(&mut conn, id)?;

    // The staff member may pick the pimpinan as part of the notification.
    if let Some(pimpinan_id) = req.pimpinan_id {
        let target = load_active_user(&mut conn, pimpinan_id)?;
        if Role::parse(&target.role) != Some(Role::Pimpinan) {
            return Err(ApiError::validation(
                "pimpinan_id",
                "The selected user is not a pimpinan.",
            ));
        }
        before.assigned_to_pimpinan_id = Some(pimpinan_id);
    }

    let rated = has_rating(&mut conn, id)?;
    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    let effects = engine::apply(
        &workflow_state(&before, rated)?,
        Action::NotifyPimpinan,
        &actor,
    )?;

    let now = Utc::now();
    let after = conn.transaction::<Ticket, ApiError, _>(|conn| {
        diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set(tickets::assigned_to_pimpinan_id.eq(before.assigned_to_pimpinan_id))
            .execute(conn)?;
        apply_effects(conn, &before, &effects, user.id(), now)
    })?;
    let sla_state = after.sla_state(now);
    Ok(Json(TicketDetail {
        ticket: after,
        sla_state,
    }))
}

pub async fn approve_pimpinan(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketDetail>, ApiError> {
    let mut conn = state.db()?;
    let before = load_ticket(&mut conn, id)?;
    let rated = has_rating(&mut conn, id)?;

    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    let effects = engine::apply(
        &workflow_state(&before, rated)?,
        Action::ApprovePimpinan,
        &actor,
    )?;

    let now = Utc::now();
    let after = apply_effects(&mut conn, &before, &effects, user.id(), now)?;
    let sla_state = after.sla_state(now);
    Ok(Json(TicketDetail {
        ticket: after,
        sla_state,
    }))
}

pub async fn complete_staff(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteTicketRequest>,
) -> Result<Json<TicketDetail>, ApiError> {
    let mut conn = state.db()?;
    let before = load_ticket(&mut conn, id)?;
    let rated = has_rating(&mut conn, id)?;

    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    // Authorization and the approval guard run first so 403 beats 400, and
    // both beat the notes validation.
    let effects = engine::apply(
        &workflow_state(&before, rated)?,
        Action::CompleteByStaff,
        &actor,
    )?;

    let notes = match req.completion_notes {
        Some(ref notes) if !notes.trim().is_empty() => notes.clone(),
        _ => {
            return Err(ApiError::validation(
                "completion_notes",
                "The completion notes field is required.",
            ))
        }
    };
    let now = Utc::now();
    let after = conn.transaction::<Ticket, ApiError, _>(|conn| {
        diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set(tickets::completion_notes.eq(Some(notes)))
            .execute(conn)?;
        apply_effects(conn, &before, &effects, user.id(), now)
    })?;
    tracing::info!(ticket_number = %after.ticket_number, "ticket completed");
    let sla_state = after.sla_state(now);
    Ok(Json(TicketDetail {
        ticket: after,
        sla_state,
    }))
}

pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TicketComment>>, ApiError> {
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, id)?;
    if !can_view(&ticket, &user) {
        return Err(ApiError::Authorization(
            "You do not have access to this ticket".to_string(),
        ));
    }

    let mut q = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(id))
        .into_boxed();
    // Internal notes are hidden from the requester.
    if user.role == Role::Pengadu {
        q = q.filter(ticket_comments::is_internal.eq(false));
    }
    let comments: Vec<TicketComment> = q.order(ticket_comments::created_at.asc()).load(&mut conn)?;
    Ok(Json(comments))
}

pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<TicketComment>), ApiError> {
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, id)?;
    if !can_view(&ticket, &user) {
        return Err(ApiError::Authorization(
            "You do not have access to this ticket".to_string(),
        ));
    }
    if req.comment.trim().is_empty() {
        return Err(ApiError::validation(
            "comment",
            "The comment field is required.",
        ));
    }

    let is_internal = req.is_internal.unwrap_or(false) && user.role != Role::Pengadu;
    let now = Utc::now();
    let comment = TicketComment {
        id: Uuid::new_v4(),
        ticket_id: id,
        user_id: user.id(),
        comment: req.comment,
        is_internal,
        created_at: now,
    };
    // A staff reply visible to the requester counts as the first response.
    let first_response_at = if ticket.first_response_at.is_none()
        && !is_internal
        && matches!(user.role, Role::StaffSupport | Role::Supervisor | Role::Admin)
    {
        Some(now)
    } else {
        ticket.first_response_at
    };
    conn.transaction::<(), ApiError, _>(|conn| {
        diesel::insert_into(ticket_comments::table)
            .values(&comment)
            .execute(conn)?;
        diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set((
                tickets::first_response_at.eq(first_response_at),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    })?;

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_attachments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TicketAttachment>>, ApiError> {
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, id)?;
    if !can_view(&ticket, &user) {
        return Err(ApiError::Authorization(
            "You do not have access to this ticket".to_string(),
        ));
    }
    let attachments: Vec<TicketAttachment> = ticket_attachments::table
        .filter(ticket_attachments::ticket_id.eq(id))
        .order(ticket_attachments::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(attachments))
}

/// Attachment metadata only; the blob itself lives in external storage and
/// is uploaded through that service.
pub async fn add_attachment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateAttachmentRequest>,
) -> Result<(StatusCode, Json<TicketAttachment>), ApiError> {
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, id)?;
    if !can_view(&ticket, &user) {
        return Err(ApiError::Authorization(
            "You do not have access to this ticket".to_string(),
        ));
    }
    if req.file_name.trim().is_empty() {
        return Err(ApiError::validation(
            "file_name",
            "The file name field is required.",
        ));
    }

    let attachment = TicketAttachment {
        id: Uuid::new_v4(),
        ticket_id: id,
        user_id: user.id(),
        file_name: req.file_name,
        file_path: req.file_path,
        file_size: req.file_size,
        created_at: Utc::now(),
    };
    diesel::insert_into(ticket_attachments::table)
        .values(&attachment)
        .execute(&mut conn)?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<history::TicketHistory>>, ApiError> {
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, id)?;
    if !can_view(&ticket, &user) {
        return Err(ApiError::Authorization(
            "You do not have access to this ticket".to_string(),
        ));
    }
    Ok(Json(history::for_ticket(&mut conn, id)?))
}

pub async fn rate_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RateTicketRequest>,
) -> Result<(StatusCode, Json<TicketRating>), ApiError> {
    let mut conn = state.db()?;
    let before = load_ticket(&mut conn, id)?;
    let rated = has_rating(&mut conn, id)?;

    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    let effects = engine::apply(&workflow_state(&before, rated)?, Action::Rate, &actor)?;

    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::validation(
            "rating",
            "The rating must be between 1 and 5.",
        ));
    }

    let rating = TicketRating {
        id: Uuid::new_v4(),
        ticket_id: id,
        user_id: user.id(),
        rating: req.rating,
        feedback: req.feedback,
        created_at: Utc::now(),
    };
    conn.transaction::<(), ApiError, _>(|conn| {
        diesel::insert_into(ticket_ratings::table)
            .values(&rating)
            .execute(conn)?;
        history::record(
            conn,
            id,
            user.id(),
            effects.history_action,
            serde_json::Value::Null,
            serde_json::json!({ "rating": rating.rating }),
        )
    })?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// Escalation hands the ticket to an explicit target or, when none is
/// given, the first active supervisor (falling back to an admin).
pub async fn escalate(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<EscalateRequest>,
) -> Result<Json<TicketDetail>, ApiError> {
    let mut conn = state.db()?;
    let before = load_ticket(&mut conn, req.ticket_id)?;
    let rated = has_rating(&mut conn, req.ticket_id)?;

    let target_id = match req.target_user_id {
        Some(id) => {
            load_active_user(&mut conn, id)?;
            id
        }
        None => pick_escalation_target(&mut conn)?,
    };

    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    let effects = engine::apply(
        &workflow_state(&before, rated)?,
        Action::Escalate { target: target_id },
        &actor,
    )?;

    let now = Utc::now();
    let note = req
        .reason
        .map(|reason| format!("Ticket escalated: {reason}"))
        .unwrap_or_else(|| "Ticket escalated".to_string());
    let after = conn.transaction::<Ticket, ApiError, _>(|conn| {
        let after = apply_effects(conn, &before, &effects, user.id(), now)?;
        let comment = TicketComment {
            id: Uuid::new_v4(),
            ticket_id: after.id,
            user_id: user.id(),
            comment: note,
            is_internal: true,
            created_at: now,
        };
        diesel::insert_into(ticket_comments::table)
            .values(&comment)
            .execute(conn)?;
        Ok(after)
    })?;

    let sla_state = after.sla_state(now);
    Ok(Json(TicketDetail {
        ticket: after,
        sla_state,
    }))
}

fn pick_escalation_target(conn: &mut PgConnection) -> Result<Uuid, ApiError> {
    for role in [Role::Supervisor, Role::Admin] {
        let found: Option<Uuid> = users::table
            .filter(users::role.eq(role.as_str()))
            .filter(users::is_active.eq(true))
            .select(users::id)
            .order(users::id.asc())
            .first(conn)
            .optional()?;
        if let Some(id) = found {
            return Ok(id);
        }
    }
    Err(ApiError::State(
        "No supervisor or admin available for escalation".to_string(),
    ))
}

pub async fn reassign(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ReassignRequest>,
) -> Result<Json<TicketDetail>, ApiError> {
    user.require(&[Role::Supervisor, Role::Admin])?;
    let mut conn = state.db()?;
    let before = load_ticket(&mut conn, req.ticket_id)?;
    let rated = has_rating(&mut conn, req.ticket_id)?;

    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    let effects = engine::apply(
        &workflow_state(&before, rated)?,
        Action::Assign {
            assignee: req.assignee_id,
        },
        &actor,
    )?;
    load_active_user(&mut conn, req.assignee_id)?;

    let now = Utc::now();
    let after = apply_effects(&mut conn, &before, &effects, user.id(), now)?;
    let sla_state = after.sla_state(now);
    Ok(Json(TicketDetail {
        ticket: after,
        sla_state,
    }))
}

/// Best-effort batch: tickets that fail a guard are skipped, already
/// processed ones stay updated, and the response reports the count that
/// actually changed.
pub async fn bulk_assign(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<BulkAssignRequest>,
) -> Result<Json<BulkResult>, ApiError> {
    user.require(&[Role::Supervisor, Role::Admin])?;
    let mut conn = state.db()?;
    load_active_user(&mut conn, req.assignee_id)?;

    let actor = Actor {
        id: user.id(),
        role: user.role,
    };
    let mut updated = 0;
    for ticket_id in req.ticket_ids {
        let Some(before) = tickets::table
            .filter(tickets::id.eq(ticket_id))
            .first::<Ticket>(&mut conn)
            .optional()?
        else {
            continue;
        };
        let rated = has_rating(&mut conn, ticket_id)?;
        let Ok(effects) = engine::apply(
            &workflow_state(&before, rated)?,
            Action::Assign {
                assignee: req.assignee_id,
            },
            &actor,
        ) else {
            continue;
        };
        apply_effects(&mut conn, &before, &effects, user.id(), Utc::now())?;
        updated += 1;
    }
    Ok(Json(BulkResult { updated }))
}

/// Bulk status update for a staff member's own queue. Tickets assigned to
/// someone else are silently skipped and excluded from the reported count.
pub async fn bulk_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<BulkStatusRequest>,
) -> Result<Json<BulkResult>, ApiError> {
    user.require(&[Role::StaffSupport])?;
    let target_status = TicketStatus::from_id(req.status_id)
        .ok_or_else(|| ApiError::validation("status_id", "The selected status is invalid."))?;
    if target_status == TicketStatus::Completed {
        return Err(ApiError::State(
            "Completion must go through the staff completion flow".to_string(),
        ));
    }

    let mut conn = state.db()?;
    let mut updated = 0;
    for ticket_id in req.ticket_ids {
        let Some(before) = tickets::table
            .filter(tickets::id.eq(ticket_id))
            .first::<Ticket>(&mut conn)
            .optional()?
        else {
            continue;
        };
        if !bulk_status_eligible(&before, user.id()) {
            continue;
        }

        let now = Utc::now();
        conn.transaction::<(), ApiError, _>(|conn| {
            diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
                .set((
                    tickets::status_id.eq(target_status.id()),
                    tickets::updated_at.eq(now),
                ))
                .execute(conn)?;
            let after = load_ticket(conn, ticket_id)?;
            history::record(
                conn,
                ticket_id,
                user.id(),
                "status_changed",
                snapshot(&before),
                snapshot(&after),
            )
        })?;
        updated += 1;
    }
    Ok(Json(BulkResult { updated }))
}

/// A bulk status change touches only the caller's own queue; tickets
/// assigned to someone else or unassigned are skipped, not errors, and
/// do not count toward the reported total.
fn bulk_status_eligible(ticket: &Ticket, actor_id: Uuid) -> bool {
    ticket.assigned_to == Some(actor_id)
}

/// Unauthenticated lookup by ticket number; only sanitized status fields
/// are exposed.
pub async fn check_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckTicketRequest>,
) -> Result<Json<PublicTicketStatus>, ApiError> {
    let mut conn = state.db()?;
    let ticket: Ticket = tickets::table
        .filter(tickets::ticket_number.eq(&req.ticket_number))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".to_string()))?;

    Ok(Json(PublicTicketStatus {
        ticket_number: ticket.ticket_number.clone(),
        status: ticket.status()?.name().to_string(),
        created_at: ticket.created_at,
        resolved_at: ticket.resolved_at,
    }))
}

pub fn configure_ticket_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route(
            "/api/tickets/:id",
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
        .route("/api/tickets/:id/assign", post(assign_ticket))
        .route("/api/tickets/:id/notify-pimpinan", post(notify_pimpinan))
        .route("/api/tickets/:id/approve-pimpinan", post(approve_pimpinan))
        .route("/api/tickets/:id/complete-staff", post(complete_staff))
        .route("/api/tickets/:id/comments", get(list_comments).post(add_comment))
        .route(
            "/api/tickets/:id/attachments",
            get(list_attachments).post(add_attachment),
        )
        .route("/api/tickets/:id/history", get(get_history))
        .route("/api/tickets/:id/rate", post(rate_ticket))
        .route("/api/staff/escalate", post(escalate))
        .route("/api/staff/bulk-status", post(bulk_status))
        .route("/api/supervisor/reassign", post(reassign))
        .route("/api/supervisor/bulk-assign", post(bulk_assign))
        .route("/api/public/check-ticket", post(check_ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_parses() {
        let json = r#"{
            "title": "VPN keeps dropping",
            "description": "Disconnects every few minutes",
            "problem_detail": "Started after the office move",
            "category_id": 2,
            "priority_id": 1
        }"#;
        let req: CreateTicketRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.title, "VPN keeps dropping");
        assert_eq!(req.category_id, 2);
    }

    #[test]
    fn test_bulk_status_request_parses() {
        let json = r#"{"ticket_ids": ["123e4567-e89b-12d3-a456-426614174000"], "status_id": 2}"#;
        let req: BulkStatusRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ticket_ids.len(), 1);
        assert_eq!(req.status_id, 2);
    }

    fn pending_ticket() -> Ticket {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        Ticket {
            id: Uuid::new_v4(),
            ticket_number: "TKT-00000007".to_string(),
            title: "Monitor flickers".to_string(),
            description: "Intermittent since Monday".to_string(),
            problem_detail: None,
            completion_notes: None,
            category_id: 1,
            priority_id: 2,
            status_id: TicketStatus::Pending.id(),
            requester_id: Uuid::new_v4(),
            assigned_to: None,
            assigned_to_pimpinan_id: None,
            staff_notified_at: None,
            pimpinan_notified_at: None,
            pimpinan_approved_at: None,
            staff_completed_at: None,
            resolved_at: None,
            first_response_at: None,
            sla_response_due: None,
            sla_resolution_due: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_merge_effects_writes_all_completion_fields_together() {
        let mut before = pending_ticket();
        before.status_id = TicketStatus::ApprovedByPimpinan.id();
        before.pimpinan_approved_at = Some(before.created_at);
        let now = before.created_at + chrono::Duration::hours(5);

        let effects = Effects {
            new_status: Some(TicketStatus::Completed),
            stamp_staff_completed: true,
            stamp_resolved: true,
            history_action: "completed_by_staff",
            ..Effects::default()
        };
        let after = merge_effects(&before, &effects, now);
        assert_eq!(after.status_id, TicketStatus::Completed.id());
        assert_eq!(after.staff_completed_at, Some(now));
        assert_eq!(after.resolved_at, Some(now));
        assert_eq!(after.updated_at, now);
        // Untouched fields survive the merge.
        assert_eq!(after.pimpinan_approved_at, before.pimpinan_approved_at);
        assert_eq!(after.ticket_number, before.ticket_number);
    }

    #[test]
    fn test_merge_effects_keeps_existing_stamps_when_not_set() {
        let mut before = pending_ticket();
        before.staff_notified_at = Some(before.created_at);
        before.assigned_to = Some(Uuid::new_v4());
        let now = before.created_at + chrono::Duration::hours(1);

        let new_assignee = Uuid::new_v4();
        let effects = Effects {
            set_assigned_to: Some(new_assignee),
            history_action: "reassigned",
            ..Effects::default()
        };
        let after = merge_effects(&before, &effects, now);
        assert_eq!(after.assigned_to, Some(new_assignee));
        assert_eq!(after.staff_notified_at, Some(before.created_at));
        assert_eq!(after.status_id, before.status_id);
    }

    #[test]
    fn test_bulk_status_skips_tickets_on_someone_elses_queue() {
        let staff_id = Uuid::new_v4();
        let mut mine = pending_ticket();
        mine.assigned_to = Some(staff_id);
        let mut theirs = pending_ticket();
        theirs.assigned_to = Some(Uuid::new_v4());
        let unassigned = pending_ticket();

        assert!(bulk_status_eligible(&mine, staff_id));
        assert!(!bulk_status_eligible(&theirs, staff_id));
        assert!(!bulk_status_eligible(&unassigned, staff_id));

        // Only eligible tickets count toward the reported total.
        let updated = [&mine, &theirs, &unassigned]
            .iter()
            .filter(|t| bulk_status_eligible(t, staff_id))
            .count();
        assert_eq!(updated, 1);
    }
}
