//! Email OTP arithmetic: code generation, expiry, and the re-request
//! window. All pure; the handlers own the persistence and delivery.

use crate::core::error::ApiError;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

pub const OTP_TTL_MINUTES: i64 = 10;

/// 6-digit numeric code, zero-padded.
pub fn generate_code<R: Rng>(rng: &mut R) -> String {
    format!("{:06}", rng.gen_range(0..1_000_000))
}

pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(OTP_TTL_MINUTES)
}

/// Whole minutes left before `expires_at`, rounded up so "30 seconds left"
/// reads as 1 minute, never 0.
pub fn remaining_minutes(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (expires_at - now).num_seconds().max(0);
    (seconds + 59) / 60
}

/// Gate a re-request against the latest unconsumed OTP for the address.
/// A still-live code blocks with 429 and the minutes remaining; an expired
/// or absent one lets a fresh code through.
pub fn check_resend(
    live_expiry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    match live_expiry {
        Some(expires_at) if expires_at > now => {
            Err(ApiError::RateLimited(rate_limit_message(expires_at, now)))
        }
        _ => Ok(()),
    }
}

pub fn rate_limit_message(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = remaining_minutes(expires_at, now);
    format!("An OTP was already sent. Please wait {minutes} minute(s) before requesting a new one.")
}

pub fn otp_email_body(code: &str) -> String {
    format!(
        "Your verification code is {code}.\n\n\
         It expires in {OTP_TTL_MINUTES} minutes. If you did not request this code, \
         you can safely ignore this email."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_code_is_six_digits() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_expiry_is_ten_minutes_out() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        assert_eq!(expiry_from(now), now + Duration::minutes(10));
    }

    #[test]
    fn test_remaining_minutes_rounds_up() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        assert_eq!(remaining_minutes(now + Duration::seconds(30), now), 1);
        assert_eq!(remaining_minutes(now + Duration::seconds(61), now), 2);
        assert_eq!(remaining_minutes(now + Duration::minutes(10), now), 10);
        // Already expired: zero, not negative.
        assert_eq!(remaining_minutes(now - Duration::minutes(1), now), 0);
    }

    #[test]
    fn test_resend_blocked_while_code_is_live() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let err = check_resend(Some(now + Duration::minutes(4)), now).unwrap_err();
        match err {
            ApiError::RateLimited(message) => {
                assert!(message.contains("4 minute(s)"), "got: {message}");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_resend_allowed_after_expiry_or_without_prior_code() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        assert!(check_resend(Some(now - Duration::minutes(1)), now).is_ok());
        assert!(check_resend(Some(now), now).is_ok());
        assert!(check_resend(None, now).is_ok());
    }

    #[test]
    fn test_rate_limit_message_states_minutes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let message = rate_limit_message(now + Duration::minutes(7), now);
        assert!(message.contains("7 minute(s)"), "got: {message}");
    }
}
