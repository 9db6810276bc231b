use crate::config::SmtpConfig;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};

/// Narrow seam for outbound mail. Delivery mechanics live behind this trait;
/// the rest of the system only knows "send this text to this address".
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MailError(pub String);

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let email = Message::builder()
            .from(
                self.config
                    .from
                    .parse()
                    .map_err(|e| MailError(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| MailError(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailError(format!("Failed to build email: {e}")))?;

        let mailer = if let (Some(user), Some(pass)) =
            (self.config.username.clone(), self.config.password.clone())
        {
            let creds = Credentials::new(user, pass);
            SmtpTransport::relay(&self.config.host)
                .map_err(|e| MailError(format!("SMTP relay error: {e}")))?
                .credentials(creds)
                .build()
        } else {
            SmtpTransport::builder_dangerous(&self.config.host).build()
        };

        mailer
            .send(&email)
            .map(|_| ())
            .map_err(|e| MailError(format!("Failed to send email: {e}")))
    }
}

/// Recording mailer for tests: stores sent messages instead of delivering.
#[derive(Default)]
pub struct StubMailer {
    pub sent: std::sync::Mutex<Vec<(String, String, String)>>,
    pub fail: bool,
}

impl Mailer for StubMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError("SMTP unavailable".to_string()));
        }
        self.sent
            .lock()
            .expect("stub mailer lock poisoned")
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_mailer_records_messages() {
        let mailer = StubMailer::default();
        mailer
            .send("user@example.com", "Your code", "123456")
            .unwrap();
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "user@example.com");
        assert_eq!(sent[0].2, "123456");
    }

    #[test]
    fn test_stub_mailer_failure_surfaces_error() {
        let mailer = StubMailer {
            fail: true,
            ..Default::default()
        };
        assert!(mailer.send("user@example.com", "x", "y").is_err());
    }
}
