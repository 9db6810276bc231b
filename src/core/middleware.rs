use crate::core::error::ApiError;
use crate::core::schema::{auth_tokens, users};
use crate::core::state::AppState;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Closed set of roles. Every authorization decision goes through this enum;
/// the role string only exists at the storage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Pengadu,
    StaffSupport,
    Supervisor,
    Pimpinan,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Pengadu => "pengadu",
            Self::StaffSupport => "staff_support",
            Self::Supervisor => "supervisor",
            Self::Pimpinan => "pimpinan",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "pengadu" => Some(Self::Pengadu),
            "staff_support" => Some(Self::StaffSupport),
            "supervisor" => Some(Self::Supervisor),
            "pimpinan" => Some(Self::Pimpinan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authenticated caller, extracted once per request from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    /// Capability check, performed once per action. Authorization failures
    /// are raised before any state guard so 403 wins over 400.
    pub fn require(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Authorization(
                "You do not have permission to perform this action".to_string(),
            ))
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<String, ApiError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
        .ok_or_else(|| ApiError::Authentication("Missing bearer token".to_string()))
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let mut conn = state.db()?;

        let user: User = auth_tokens::table
            .inner_join(users::table.on(users::id.eq(auth_tokens::user_id)))
            .filter(auth_tokens::token.eq(&token))
            .select((
                users::id,
                users::name,
                users::email,
                users::password_hash,
                users::role,
                users::is_active,
                users::created_at,
                users::updated_at,
            ))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| ApiError::Authentication("Invalid token".to_string()))?;

        if !user.is_active {
            return Err(ApiError::Authentication(
                "Account is deactivated".to_string(),
            ));
        }

        let role = Role::parse(&user.role)
            .ok_or_else(|| ApiError::Internal(format!("Unknown role: {}", user.role)))?;

        Ok(Self { user, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role: Role) -> AuthenticatedUser {
        let now = Utc::now();
        AuthenticatedUser {
            user: User {
                id: Uuid::new_v4(),
                name: "Test".to_string(),
                email: "test@example.com".to_string(),
                password_hash: String::new(),
                role: role.as_str().to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            role,
        }
    }

    #[test]
    fn test_role_round_trip() {
        for role in [
            Role::Admin,
            Role::Pengadu,
            Role::StaffSupport,
            Role::Supervisor,
            Role::Pimpinan,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("teknisi"), None);
    }

    #[test]
    fn test_require_rejects_other_roles() {
        let staff = user_with_role(Role::StaffSupport);
        assert!(staff.require(&[Role::StaffSupport, Role::Admin]).is_ok());
        let err = staff.require(&[Role::Pimpinan]).unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
    }
}
