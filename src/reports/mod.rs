//! Read-only reporting over the ticket set: role dashboards, executive
//! analytics, supervisor team views, and staff SLA alerts. Nothing in this
//! module mutates tickets.

pub mod metrics;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::ApiError;
use crate::core::middleware::{AuthenticatedUser, Role};
use crate::core::schema::{priorities, tickets, users};
use crate::core::state::{AppState, DbConn};
use crate::tickets::engine::TicketStatus;
use crate::tickets::sla::SlaState;
use crate::tickets::Ticket;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CountEntry {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct SlaBuckets {
    pub response_breached: i64,
    pub resolution_breached: i64,
    pub warning: i64,
    pub normal: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub total: i64,
    pub open: i64,
    pub by_status: Vec<CountEntry>,
    pub by_priority: Vec<CountEntry>,
    pub sla: SlaBuckets,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsReport {
    pub period_hours: i64,
    pub created: i64,
    pub resolved: i64,
    pub resolution_rate: f64,
    pub sla: SlaBuckets,
}

#[derive(Debug, Serialize)]
pub struct PerformerEntry {
    pub user_id: Uuid,
    pub name: String,
    pub resolved_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ExecutiveReport {
    pub period_days: i64,
    pub total_created: i64,
    pub total_resolved: i64,
    pub resolution_rate: f64,
    pub avg_resolution_hours: f64,
    pub avg_first_response_hours: f64,
    pub sla_compliance_pct: f64,
    pub by_status: Vec<CountEntry>,
    pub by_priority: Vec<CountEntry>,
    pub top_performers: Vec<PerformerEntry>,
}

#[derive(Debug, Serialize)]
pub struct TeamMemberOverview {
    pub user_id: Uuid,
    pub name: String,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
}

#[derive(Debug, Serialize)]
pub struct TeamMemberPerformance {
    pub user_id: Uuid,
    pub name: String,
    pub resolved_count: i64,
    pub avg_resolution_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct SlaAlert {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub title: String,
    pub sla_state: SlaState,
    pub sla_response_due: Option<DateTime<Utc>>,
    pub sla_resolution_due: Option<DateTime<Utc>>,
}

/// Tickets visible to the caller for dashboard purposes.
fn scoped_tickets(conn: &mut DbConn, user: &AuthenticatedUser) -> Result<Vec<Ticket>, ApiError> {
    let mut q = tickets::table.into_boxed();
    match user.role {
        Role::Pengadu => q = q.filter(tickets::requester_id.eq(user.id())),
        Role::StaffSupport => q = q.filter(tickets::assigned_to.eq(user.id())),
        Role::Admin | Role::Supervisor | Role::Pimpinan => {}
    }
    Ok(q.order(tickets::created_at.desc()).load(conn)?)
}

fn status_label(status_id: i32) -> String {
    TicketStatus::from_id(status_id)
        .map(|s| s.name().to_string())
        .unwrap_or_else(|| format!("Unknown ({status_id})"))
}

fn count_by_status(rows: &[Ticket]) -> Vec<CountEntry> {
    let mut counts: BTreeMap<i32, i64> = BTreeMap::new();
    for ticket in rows {
        *counts.entry(ticket.status_id).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(status_id, count)| CountEntry {
            label: status_label(status_id),
            count,
        })
        .collect()
}

fn count_by_priority(
    conn: &mut DbConn,
    rows: &[Ticket],
) -> Result<Vec<CountEntry>, ApiError> {
    let names: Vec<(i32, String)> = priorities::table
        .select((priorities::id, priorities::name))
        .load(conn)?;
    let names: BTreeMap<i32, String> = names.into_iter().collect();

    let mut counts: BTreeMap<i32, i64> = BTreeMap::new();
    for ticket in rows {
        *counts.entry(ticket.priority_id).or_insert(0) += 1;
    }
    Ok(counts
        .into_iter()
        .map(|(priority_id, count)| CountEntry {
            label: names
                .get(&priority_id)
                .cloned()
                .unwrap_or_else(|| format!("Priority {priority_id}")),
            count,
        })
        .collect())
}

fn sla_buckets(rows: &[Ticket], now: DateTime<Utc>) -> SlaBuckets {
    let mut buckets = SlaBuckets {
        response_breached: 0,
        resolution_breached: 0,
        warning: 0,
        normal: 0,
    };
    for ticket in rows {
        match ticket.sla_state(now) {
            SlaState::ResponseBreached => buckets.response_breached += 1,
            SlaState::ResolutionBreached => buckets.resolution_breached += 1,
            SlaState::ResponseWarning | SlaState::ResolutionWarning => buckets.warning += 1,
            SlaState::Normal => buckets.normal += 1,
        }
    }
    buckets
}

fn is_open(ticket: &Ticket) -> bool {
    TicketStatus::from_id(ticket.status_id).is_some_and(|s| !s.is_closed())
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<DashboardSummary>, ApiError> {
    let mut conn = state.db()?;
    let rows = scoped_tickets(&mut conn, &user)?;
    let now = Utc::now();

    let open_rows: Vec<&Ticket> = rows.iter().filter(|t| is_open(t)).collect();
    let summary = DashboardSummary {
        total: rows.len() as i64,
        open: open_rows.len() as i64,
        by_status: count_by_status(&rows),
        by_priority: count_by_priority(&mut conn, &rows)?,
        sla: sla_buckets(&rows, now),
    };
    Ok(Json(summary))
}

pub async fn dashboard_analytics(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsReport>, ApiError> {
    let mut conn = state.db()?;
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 365);
    let now = Utc::now();
    let since = now - Duration::hours(hours);

    let rows: Vec<Ticket> = scoped_tickets(&mut conn, &user)?
        .into_iter()
        .filter(|t| t.created_at >= since)
        .collect();
    let resolved = rows.iter().filter(|t| t.resolved_at.is_some()).count() as i64;

    Ok(Json(AnalyticsReport {
        period_hours: hours,
        created: rows.len() as i64,
        resolved,
        resolution_rate: metrics::resolution_rate(resolved, rows.len() as i64),
        sla: sla_buckets(&rows, now),
    }))
}

fn period_rows(conn: &mut DbConn, days: i64) -> Result<Vec<Ticket>, ApiError> {
    let since = Utc::now() - Duration::days(days);
    Ok(tickets::table
        .filter(tickets::created_at.ge(since))
        .order(tickets::created_at.desc())
        .load(conn)?)
}

fn staff_names(conn: &mut DbConn) -> Result<BTreeMap<Uuid, String>, ApiError> {
    let rows: Vec<(Uuid, String)> = users::table
        .filter(users::role.eq(Role::StaffSupport.as_str()))
        .select((users::id, users::name))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn build_executive_report(
    conn: &mut DbConn,
    rows: &[Ticket],
    days: i64,
) -> Result<ExecutiveReport, ApiError> {
    let total = rows.len() as i64;
    let resolved: Vec<&Ticket> = rows.iter().filter(|t| t.resolved_at.is_some()).collect();

    let resolution_seconds: Vec<i64> = resolved
        .iter()
        .filter_map(|t| t.resolved_at.map(|r| (r - t.created_at).num_seconds()))
        .collect();
    let response_seconds: Vec<i64> = rows
        .iter()
        .filter_map(|t| t.first_response_at.map(|r| (r - t.created_at).num_seconds()))
        .collect();

    // Compliance: resolved within the resolution deadline stamped at
    // creation. Tickets without an SLA are excluded from the denominator.
    let with_sla: Vec<&&Ticket> = resolved
        .iter()
        .filter(|t| t.sla_resolution_due.is_some())
        .collect();
    let within_sla = with_sla
        .iter()
        .filter(|t| match (t.resolved_at, t.sla_resolution_due) {
            (Some(resolved_at), Some(due)) => resolved_at <= due,
            _ => false,
        })
        .count() as i64;

    let mut per_staff: BTreeMap<Uuid, i64> = BTreeMap::new();
    for ticket in &resolved {
        if let Some(staff_id) = ticket.assigned_to {
            *per_staff.entry(staff_id).or_insert(0) += 1;
        }
    }
    let names = staff_names(conn)?;
    let top = metrics::top_performers(per_staff.into_iter().collect())
        .into_iter()
        .map(|(user_id, resolved_count)| PerformerEntry {
            user_id,
            name: names
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()),
            resolved_count,
        })
        .collect();

    Ok(ExecutiveReport {
        period_days: days,
        total_created: total,
        total_resolved: resolved.len() as i64,
        resolution_rate: metrics::resolution_rate(resolved.len() as i64, total),
        avg_resolution_hours: metrics::average_hours(&resolution_seconds),
        avg_first_response_hours: metrics::average_hours(&response_seconds),
        sla_compliance_pct: metrics::percentage(within_sla, with_sla.len() as i64),
        by_status: count_by_status(rows),
        by_priority: count_by_priority(conn, rows)?,
        top_performers: top,
    })
}

pub async fn executive_dashboard(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<ExecutiveReport>, ApiError> {
    user.require(&[Role::Pimpinan, Role::Admin])?;
    let mut conn = state.db()?;
    let days = query.period.unwrap_or(30).clamp(1, 365);
    let rows = period_rows(&mut conn, days)?;
    Ok(Json(build_executive_report(&mut conn, &rows, days)?))
}

/// CSV export of the executive period. One row per ticket with its SLA
/// outcome; streamed as an attachment.
pub async fn export_report(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(&[Role::Pimpinan, Role::Admin])?;
    let mut conn = state.db()?;
    let days = query.period.unwrap_or(30).clamp(1, 365);
    let rows = period_rows(&mut conn, days)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "ticket_number",
            "title",
            "status",
            "created_at",
            "resolved_at",
            "sla_met",
        ])
        .map_err(|e| ApiError::Internal(format!("CSV error: {e}")))?;
    for ticket in &rows {
        let sla_met = match (ticket.resolved_at, ticket.sla_resolution_due) {
            (Some(resolved_at), Some(due)) => {
                if resolved_at <= due {
                    "yes"
                } else {
                    "no"
                }
            }
            _ => "n/a",
        };
        writer
            .write_record([
                ticket.ticket_number.as_str(),
                ticket.title.as_str(),
                status_label(ticket.status_id).as_str(),
                ticket.created_at.to_rfc3339().as_str(),
                ticket
                    .resolved_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
                    .as_str(),
                sla_met,
            ])
            .map_err(|e| ApiError::Internal(format!("CSV error: {e}")))?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("CSV error: {e}")))?;
    let body = String::from_utf8(body)
        .map_err(|e| ApiError::Internal(format!("CSV encoding error: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"ticket-report-{days}d.csv\""),
            ),
        ],
        body,
    ))
}

pub async fn team_overview(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<TeamMemberOverview>>, ApiError> {
    user.require(&[Role::Supervisor, Role::Admin])?;
    let mut conn = state.db()?;

    let staff: Vec<(Uuid, String)> = users::table
        .filter(users::role.eq(Role::StaffSupport.as_str()))
        .filter(users::is_active.eq(true))
        .select((users::id, users::name))
        .order(users::id.asc())
        .load(&mut conn)?;

    let mut overview = Vec::with_capacity(staff.len());
    for (user_id, name) in staff {
        let rows: Vec<Ticket> = tickets::table
            .filter(tickets::assigned_to.eq(user_id))
            .load(&mut conn)?;
        let count_status = |status: TicketStatus| {
            rows.iter().filter(|t| t.status_id == status.id()).count() as i64
        };
        overview.push(TeamMemberOverview {
            user_id,
            name,
            pending: count_status(TicketStatus::Pending),
            in_progress: count_status(TicketStatus::InProgress),
            completed: count_status(TicketStatus::Completed),
        });
    }
    Ok(Json(overview))
}

pub async fn team_performance(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<TeamMemberPerformance>>, ApiError> {
    user.require(&[Role::Supervisor, Role::Admin])?;
    let mut conn = state.db()?;

    let staff: Vec<(Uuid, String)> = users::table
        .filter(users::role.eq(Role::StaffSupport.as_str()))
        .filter(users::is_active.eq(true))
        .select((users::id, users::name))
        .order(users::id.asc())
        .load(&mut conn)?;

    let mut performance = Vec::with_capacity(staff.len());
    for (user_id, name) in staff {
        let resolved: Vec<Ticket> = tickets::table
            .filter(tickets::assigned_to.eq(user_id))
            .filter(tickets::resolved_at.is_not_null())
            .load(&mut conn)?;
        let seconds: Vec<i64> = resolved
            .iter()
            .filter_map(|t| t.resolved_at.map(|r| (r - t.created_at).num_seconds()))
            .collect();
        performance.push(TeamMemberPerformance {
            user_id,
            name,
            resolved_count: resolved.len() as i64,
            avg_resolution_hours: metrics::average_hours(&seconds),
        });
    }
    performance.sort_by(|a, b| b.resolved_count.cmp(&a.resolved_count));
    Ok(Json(performance))
}

/// Open tickets on the caller's queue that have breached or are about to
/// breach their SLA. Computed on read; nothing is polled or stored.
pub async fn sla_alerts(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<SlaAlert>>, ApiError> {
    user.require(&[Role::StaffSupport])?;
    let mut conn = state.db()?;
    let now = Utc::now();

    let open_statuses = [TicketStatus::Pending.id(), TicketStatus::InProgress.id()];
    let rows: Vec<Ticket> = tickets::table
        .filter(tickets::assigned_to.eq(user.id()))
        .filter(tickets::status_id.eq_any(open_statuses))
        .order(tickets::sla_resolution_due.asc())
        .load(&mut conn)?;

    let alerts = rows
        .into_iter()
        .filter_map(|ticket| {
            let sla_state = ticket.sla_state(now);
            if sla_state == SlaState::Normal {
                return None;
            }
            Some(SlaAlert {
                ticket_id: ticket.id,
                ticket_number: ticket.ticket_number,
                title: ticket.title,
                sla_state,
                sla_response_due: ticket.sla_response_due,
                sla_resolution_due: ticket.sla_resolution_due,
            })
        })
        .collect();
    Ok(Json(alerts))
}

pub fn configure_report_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/dashboard", get(dashboard))
        .route("/api/dashboard/analytics", get(dashboard_analytics))
        .route("/api/executive/dashboard", get(executive_dashboard))
        .route("/api/executive/export-report", get(export_report))
        .route("/api/supervisor/team-overview", get(team_overview))
        .route("/api/supervisor/team-performance", get(team_performance))
        .route("/api/staff/sla-alerts", get(sla_alerts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::Ticket;
    use chrono::TimeZone;

    fn ticket(status: TicketStatus, priority_id: i32) -> Ticket {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        Ticket {
            id: Uuid::new_v4(),
            ticket_number: "TKT-00000001".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            problem_detail: None,
            completion_notes: None,
            category_id: 1,
            priority_id,
            status_id: status.id(),
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
    fn test_count_by_status_labels() {
        let rows = vec![
            ticket(TicketStatus::Pending, 1),
            ticket(TicketStatus::Pending, 1),
            ticket(TicketStatus::Completed, 2),
        ];
        let counts = count_by_status(&rows);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].label, "Pending");
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].label, "Completed");
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn test_sla_buckets_with_no_deadlines_are_normal() {
        let rows = vec![ticket(TicketStatus::Pending, 1)];
        let buckets = sla_buckets(&rows, Utc::now());
        assert_eq!(buckets.normal, 1);
        assert_eq!(buckets.response_breached, 0);
    }

    #[test]
    fn test_is_open_tracks_terminal_statuses() {
        assert!(is_open(&ticket(TicketStatus::InProgress, 1)));
        assert!(!is_open(&ticket(TicketStatus::Closed, 1)));
    }
}
