use tidepool_shared::error::ChatError;

use crate::config::EmailConfig;

#[async_trait::async_trait]
pub trait EmailService: Send + Sync {
    async fn send_verification_email(&self, to: &str, code: &str) -> Result<(), ChatError>;
}

/// Mock email service that logs codes via tracing. Used for development and
/// testing.
#[derive(Default)]
pub struct MockEmailService;

impl MockEmailService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EmailService for MockEmailService {
    async fn send_verification_email(&self, to: &str, code: &str) -> Result<(), ChatError> {
        tracing::info!(to = to, code = code, "mock: verification email");
        Ok(())
    }
}

/// SMTP email service using lettre.
pub struct SmtpEmailService {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from: lettre::message::Mailbox,
    verify_base_url: String,
}

impl SmtpEmailService {
    pub fn new(config: &EmailConfig) -> Result<Self, ChatError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::AsyncSmtpTransport;

        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let transport =
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| ChatError::internal(format!("SMTP relay error: {e}")))?
                .port(config.smtp_port)
                .credentials(creds)
                .build();

        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| ChatError::internal(format!("invalid from address: {e}")))?;

        Ok(Self {
            transport,
            from,
            verify_base_url: config.verify_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send_email(&self, to: &str, subject: &str, body: String) -> Result<(), ChatError> {
        use lettre::{AsyncTransport, Message};

        let to_mailbox: lettre::message::Mailbox = to
            .parse()
            .map_err(|e| ChatError::validation(format!("invalid email address: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .body(body)
            .map_err(|e| ChatError::internal(format!("email build error: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ChatError::Upstream(format!("email send failed: {e}")))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl EmailService for SmtpEmailService {
    async fn send_verification_email(&self, to: &str, code: &str) -> Result<(), ChatError> {
        let url = format!("{}/{code}", self.verify_base_url);
        self.send_email(
            to,
            "Verify your account",
            format!(
                "Click the link below to verify your email address.\n\n{url}\n\n\
                 If you didn't create an account, you can safely ignore this email."
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_email_service_implements_trait() {
        let svc = MockEmailService::new();
        assert!(svc
            .send_verification_email("a@b.com", "code123456")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn smtp_email_service_initializes_with_valid_config() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_username: "user".to_string(),
            smtp_password: "pass".to_string(),
            from_address: "noreply@example.com".to_string(),
            from_name: "Tidepool".to_string(),
            verify_base_url: "https://chat.example.com/verify".to_string(),
        };
        assert!(SmtpEmailService::new(&config).is_ok());
    }

    #[tokio::test]
    async fn smtp_email_service_fails_with_invalid_from_address() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            from_address: "not-an-email".to_string(),
            from_name: String::new(),
            ..Default::default()
        };
        assert!(SmtpEmailService::new(&config).is_err());
    }
}
