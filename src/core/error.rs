use axum::{response::IntoResponse, Json};
use std::collections::BTreeMap;

/// Error taxonomy for the whole API surface. Handlers return this and the
/// boundary converts each variant to a status code plus a JSON body; nothing
/// else crosses into caller-visible state.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(BTreeMap<String, Vec<String>>),
    #[error("Unauthenticated: {0}")]
    Authentication(String),
    #[error("Forbidden: {0}")]
    Authorization(String),
    #[error("Invalid state: {0}")]
    State(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Mail delivery failed: {0}")]
    Mail(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Single-field validation error, the common case.
    pub fn validation(field: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        match self {
            Self::Validation(errors) => {
                let body = serde_json::json!({
                    "message": "The given data was invalid.",
                    "errors": errors,
                });
                (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
            }
            Self::Authentication(msg) => respond(StatusCode::UNAUTHORIZED, msg),
            Self::Authorization(msg) => respond(StatusCode::FORBIDDEN, msg),
            Self::State(msg) => respond(StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => respond(StatusCode::CONFLICT, msg),
            Self::NotFound(msg) => respond(StatusCode::NOT_FOUND, msg),
            Self::RateLimited(msg) => respond(StatusCode::TOO_MANY_REQUESTS, msg),
            Self::Mail(msg) | Self::Database(msg) | Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                respond(StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        }
    }
}

fn respond(status: axum::http::StatusCode, message: String) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl From<diesel::result::Error> for ApiError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => Self::NotFound("Record not found".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for ApiError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::Database(format!("Connection error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_builds_field_keyed_errors() {
        let err = ApiError::validation("email", "The email field is required.");
        match err {
            ApiError::Validation(errors) => {
                assert_eq!(
                    errors.get("email").map(|v| v.as_slice()),
                    Some(&["The email field is required.".to_string()][..])
                );
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_not_found_from_diesel() {
        let err: ApiError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
