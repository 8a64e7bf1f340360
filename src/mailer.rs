//! Outgoing mail for password resets

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EmailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset(&self, to_email: &str, name: &str, reset_url: &str) -> Result<()>;
}

/// Build the mailer for the current configuration: SMTP when configured,
/// otherwise one that only logs.
pub fn from_config(config: Option<&EmailConfig>) -> Result<Arc<dyn Mailer>> {
    match config {
        Some(email) => Ok(Arc::new(SmtpMailer::new(email)?)),
        None => Ok(Arc::new(LogOnlyMailer)),
    }
}

#[derive(Clone)]
pub struct SmtpMailer {
    from_address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        if !config.smtp_url.starts_with("smtp://") && !config.smtp_url.starts_with("smtps://") {
            return Err(anyhow!("SMTP URL must start with smtp:// or smtps://"));
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::from_url(&config.smtp_url)
            .map_err(|e| anyhow!("SMTP setup failed: {}", e))?
            .build();

        Ok(Self {
            from_address: config.from_address.clone(),
            transport,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_password_reset(&self, to_email: &str, name: &str, reset_url: &str) -> Result<()> {
        let email = Message::builder()
            .from(self.from_address.parse().map_err(|e| anyhow!("Invalid from address: {}", e))?)
            .to(to_email.parse().map_err(|e| anyhow!("Invalid to address: {}", e))?)
            .subject("Reset your AI StudyMate password")
            .header(ContentType::TEXT_HTML)
            .body(reset_email_html(name, reset_url))
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;

        info!(component = "mailer", to = %to_email, "Password reset email sent");
        Ok(())
    }
}

pub struct LogOnlyMailer;

#[async_trait]
impl Mailer for LogOnlyMailer {
    async fn send_password_reset(&self, to_email: &str, _name: &str, reset_url: &str) -> Result<()> {
        warn!(
            component = "mailer",
            to = %to_email,
            reset_url = %reset_url,
            "Email not configured, skipping password reset email"
        );
        Ok(())
    }
}

pub fn reset_email_html(name: &str, reset_url: &str) -> String {
    let name = html_escape::encode_text(name);
    let href = html_escape::encode_double_quoted_attribute(reset_url);
    format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: sans-serif; color: #1f2937;">
    <h2>AI StudyMate</h2>
    <p>Hello {name},</p>
    <p>We received a request to reset your password. Click the button below to choose a new one.</p>
    <p>
      <a href="{href}" style="display:inline-block;padding:10px 20px;background:#2563eb;color:#fff;border-radius:6px;text-decoration:none;">
        Reset password
      </a>
    </p>
    <p>Or paste this link into your browser:<br>{href}</p>
    <p>This link expires in 1 hour and can only be used once.</p>
    <p>If you did not request a password reset, you can ignore this email.</p>
  </body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_email_escapes_name_and_embeds_link() {
        let html = reset_email_html("<b>Eve</b>", "http://localhost:3000/auth/reset-password?token=abc&x=1");
        assert!(html.contains("&lt;b&gt;Eve&lt;/b&gt;"));
        assert!(html.contains("token=abc&amp;x=1"));
        assert!(html.contains("1 hour"));
    }

    #[test]
    fn smtp_mailer_rejects_unknown_scheme() {
        let config = EmailConfig {
            smtp_url: "http://mail.example.com".to_string(),
            from_address: "noreply@example.com".to_string(),
        };
        assert!(SmtpMailer::new(&config).is_err());
    }

    #[tokio::test]
    async fn log_only_mailer_never_fails() {
        let mailer = from_config(None).unwrap();
        assert!(mailer
            .send_password_reset("a@example.com", "A", "http://x/reset")
            .await
            .is_ok());
    }
}
