//! Reference data: categories, priorities, statuses, and SLA policies.
//! Mostly read; writes are admin-only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::error::ApiError;
use crate::core::middleware::{AuthenticatedUser, Role};
use crate::core::schema::{categories, priorities, sla_policies, statuses};
use crate::core::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = categories)]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = priorities)]
pub struct Priority {
    pub id: i32,
    pub name: String,
    pub level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = statuses)]
pub struct Status {
    pub id: i32,
    pub name: String,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sla_policies)]
pub struct SlaPolicy {
    pub id: i32,
    pub priority_id: i32,
    pub response_time_hours: i32,
    pub resolution_time_hours: i32,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertSlaPolicyRequest {
    pub priority_id: i32,
    pub response_time_hours: i32,
    pub resolution_time_hours: i32,
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Category>>, ApiError> {
    let mut conn = state.db()?;
    let rows: Vec<Category> = categories::table
        .filter(categories::is_active.eq(true))
        .order(categories::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    user.require(&[Role::Admin])?;
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("name", "The name field is required."));
    }
    let mut conn = state.db()?;
    let category: Category = diesel::insert_into(categories::table)
        .values((categories::name.eq(req.name), categories::is_active.eq(true)))
        .returning((categories::id, categories::name, categories::is_active))
        .get_result(&mut conn)?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i32>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<Category>, ApiError> {
    user.require(&[Role::Admin])?;
    let mut conn = state.db()?;

    if let Some(name) = req.name {
        diesel::update(categories::table.filter(categories::id.eq(id)))
            .set(categories::name.eq(name))
            .execute(&mut conn)?;
    }
    if let Some(is_active) = req.is_active {
        diesel::update(categories::table.filter(categories::id.eq(id)))
            .set(categories::is_active.eq(is_active))
            .execute(&mut conn)?;
    }

    let category: Category = categories::table
        .filter(categories::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Category not found".to_string()))?;
    Ok(Json(category))
}

pub async fn list_priorities(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Priority>>, ApiError> {
    let mut conn = state.db()?;
    let rows: Vec<Priority> = priorities::table
        .order(priorities::level.asc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn list_statuses(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Status>>, ApiError> {
    let mut conn = state.db()?;
    let rows: Vec<Status> = statuses::table.order(statuses::id.asc()).load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn list_sla_policies(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<SlaPolicy>>, ApiError> {
    let mut conn = state.db()?;
    let rows: Vec<SlaPolicy> = sla_policies::table
        .filter(sla_policies::is_active.eq(true))
        .order(sla_policies::priority_id.asc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

/// One active policy per priority: creating a new one deactivates any
/// existing active policy for that priority first.
pub async fn upsert_sla_policy(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<UpsertSlaPolicyRequest>,
) -> Result<(StatusCode, Json<SlaPolicy>), ApiError> {
    user.require(&[Role::Admin])?;
    if req.response_time_hours <= 0 || req.resolution_time_hours <= 0 {
        return Err(ApiError::validation(
            "resolution_time_hours",
            "SLA hours must be positive.",
        ));
    }
    let mut conn = state.db()?;

    diesel::update(
        sla_policies::table
            .filter(sla_policies::priority_id.eq(req.priority_id))
            .filter(sla_policies::is_active.eq(true)),
    )
    .set(sla_policies::is_active.eq(false))
    .execute(&mut conn)?;

    let policy: SlaPolicy = diesel::insert_into(sla_policies::table)
        .values((
            sla_policies::priority_id.eq(req.priority_id),
            sla_policies::response_time_hours.eq(req.response_time_hours),
            sla_policies::resolution_time_hours.eq(req.resolution_time_hours),
            sla_policies::is_active.eq(true),
        ))
        .returning((
            sla_policies::id,
            sla_policies::priority_id,
            sla_policies::response_time_hours,
            sla_policies::resolution_time_hours,
            sla_policies::is_active,
        ))
        .get_result(&mut conn)?;
    Ok((StatusCode::CREATED, Json(policy)))
}

pub fn configure_reference_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/reference/categories",
            get(list_categories).post(create_category),
        )
        .route("/api/reference/categories/:id", axum::routing::put(update_category))
        .route("/api/reference/priorities", get(list_priorities))
        .route("/api/reference/statuses", get(list_statuses))
        .route(
            "/api/reference/sla-policies",
            get(list_sla_policies).post(upsert_sla_policy),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sla_policy_request_parses() {
        let json = r#"{"priority_id": 1, "response_time_hours": 4, "resolution_time_hours": 24}"#;
        let req: UpsertSlaPolicyRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.response_time_hours, 4);
        assert_eq!(req.resolution_time_hours, 24);
    }
}
