pub mod otp;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
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
use crate::core::schema::{auth_tokens, email_otps, users};
use crate::core::state::AppState;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = email_otps)]
pub struct EmailOtp {
    pub id: Uuid,
    pub email: String,
    pub otp_code: String,
    pub name: String,
    pub password_hash: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = auth_tokens)]
pub struct AuthToken {
    pub token: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: User,
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn issue_token(conn: &mut PgConnection, user_id: Uuid) -> Result<String, ApiError> {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    let token = hex::encode(bytes);
    let row = AuthToken {
        token: token.clone(),
        user_id,
        created_at: Utc::now(),
    };
    diesel::insert_into(auth_tokens::table)
        .values(&row)
        .execute(conn)?;
    Ok(token)
}

/// Shared by send-otp and verify-otp: an address that is already
/// registered is a field-keyed validation failure at both steps, even when
/// the registration happened between them.
fn ensure_email_free(existing: i64) -> Result<(), ApiError> {
    if existing > 0 {
        return Err(ApiError::validation(
            "email",
            "The email has already been taken.",
        ));
    }
    Ok(())
}

fn email_taken(conn: &mut PgConnection, email: &str) -> Result<(), ApiError> {
    let existing: i64 = users::table
        .filter(users::email.eq(email))
        .count()
        .get_result(conn)?;
    ensure_email_free(existing)
}

fn validate_registration(req: &SendOtpRequest) -> Result<(), ApiError> {
    if req.email.trim().is_empty() || !req.email.contains('@') {
        return Err(ApiError::validation(
            "email",
            "The email must be a valid email address.",
        ));
    }
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("name", "The name field is required."));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation(
            "password",
            "The password must be at least 8 characters.",
        ));
    }
    Ok(())
}

/// Start registration: store a pending OTP and email the code. While a live
/// OTP exists, re-requests get 429 with the minutes remaining. A mail
/// failure surfaces as a 500-class error but the OTP row is kept.
pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendOtpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_registration(&req)?;
    let mut conn = state.db()?;
    let now = Utc::now();

    email_taken(&mut conn, &req.email)?;

    let latest_unconsumed: Option<DateTime<Utc>> = email_otps::table
        .filter(email_otps::email.eq(&req.email))
        .filter(email_otps::consumed_at.is_null())
        .select(email_otps::expires_at)
        .order(email_otps::expires_at.desc())
        .first(&mut conn)
        .optional()?;
    otp::check_resend(latest_unconsumed, now)?;

    let code = otp::generate_code(&mut rand::thread_rng());
    let row = EmailOtp {
        id: Uuid::new_v4(),
        email: req.email.clone(),
        otp_code: code.clone(),
        name: req.name,
        password_hash: hash_password(&req.password)?,
        expires_at: otp::expiry_from(now),
        consumed_at: None,
        created_at: now,
    };
    diesel::insert_into(email_otps::table)
        .values(&row)
        .execute(&mut conn)?;

    // Delivery failure does not roll back the OTP record.
    state
        .mailer
        .send(&req.email, "Your verification code", &otp::otp_email_body(&code))
        .map_err(|e| ApiError::Mail(e.to_string()))?;

    tracing::info!(email = %req.email, "registration OTP sent");
    Ok(Json(serde_json::json!({
        "message": "A verification code has been sent to your email."
    })))
}

/// Finish registration: a valid code creates the `pengadu` account and
/// returns a bearer token.
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let mut conn = state.db()?;
    let now = Utc::now();

    let pending: Option<EmailOtp> = email_otps::table
        .filter(email_otps::email.eq(&req.email))
        .filter(email_otps::otp_code.eq(&req.otp))
        .filter(email_otps::consumed_at.is_null())
        .filter(email_otps::expires_at.gt(now))
        .first(&mut conn)
        .optional()?;
    let Some(pending) = pending else {
        return Err(ApiError::validation(
            "otp",
            "The OTP is invalid or has expired.",
        ));
    };

    // The address can have been registered between send and verify; report
    // that the same way the send path does, not as a unique-key fault.
    email_taken(&mut conn, &pending.email)?;

    let user = User {
        id: Uuid::new_v4(),
        name: pending.name,
        email: pending.email.clone(),
        password_hash: pending.password_hash,
        role: Role::Pengadu.as_str().to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let token = conn.transaction::<String, ApiError, _>(|conn| {
        diesel::update(email_otps::table.filter(email_otps::id.eq(pending.id)))
            .set(email_otps::consumed_at.eq(Some(now)))
            .execute(conn)?;
        diesel::insert_into(users::table)
            .values(&user)
            .execute(conn)?;
        issue_token(conn, user.id)
    })?;
    tracing::info!(email = %user.email, "account verified and created");
    Ok((StatusCode::CREATED, Json(TokenResponse { token, user })))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let mut conn = state.db()?;

    let user: Option<User> = users::table
        .filter(users::email.eq(&req.email))
        .first(&mut conn)
        .optional()?;
    let Some(user) = user else {
        return Err(ApiError::Authentication(
            "Invalid email or password".to_string(),
        ));
    };
    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::Authentication(
            "Invalid email or password".to_string(),
        ));
    }
    if !user.is_active {
        return Err(ApiError::Authentication(
            "Account is deactivated".to_string(),
        ));
    }

    let token = issue_token(&mut conn, user.id)?;
    Ok(Json(TokenResponse { token, user }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.db()?;
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        diesel::delete(
            auth_tokens::table
                .filter(auth_tokens::token.eq(token))
                .filter(auth_tokens::user_id.eq(user.id())),
        )
        .execute(&mut conn)?;
    }
    Ok(Json(serde_json::json!({ "message": "Logged out." })))
}

pub async fn current_user(user: AuthenticatedUser) -> Json<User> {
    Json(user.user)
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/register/send-otp", post(send_otp))
        .route("/api/register/verify-otp", post(verify_otp))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/user", get(current_user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn test_registration_validation() {
        let valid = SendOtpRequest {
            email: "user@example.com".to_string(),
            name: "User".to_string(),
            password: "longenough".to_string(),
        };
        assert!(validate_registration(&valid).is_ok());

        let bad_email = SendOtpRequest {
            email: "nope".to_string(),
            ..clone_req(&valid)
        };
        assert!(matches!(
            validate_registration(&bad_email),
            Err(ApiError::Validation(_))
        ));

        let short_password = SendOtpRequest {
            password: "short".to_string(),
            ..clone_req(&valid)
        };
        assert!(matches!(
            validate_registration(&short_password),
            Err(ApiError::Validation(_))
        ));
    }

    fn clone_req(req: &SendOtpRequest) -> SendOtpRequest {
        SendOtpRequest {
            email: req.email.clone(),
            name: req.name.clone(),
            password: req.password.clone(),
        }
    }

    #[test]
    fn test_registered_email_is_field_keyed_validation_at_both_steps() {
        assert!(ensure_email_free(0).is_ok());
        match ensure_email_free(1) {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.contains_key("email"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
