//! SMTP reply surface — sends drafted replies via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::MailboxConfig;
use crate::error::NotifyError;
use crate::notify::ReplySender;

/// Sends replies through the configured mailbox's SMTP endpoint.
pub struct SmtpNotifier {
    config: MailboxConfig,
}

impl SmtpNotifier {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }

    fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );

        let transport = SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| NotifyError::Send {
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(self.config.from_address.parse().map_err(|e| {
                NotifyError::InvalidAddress {
                    reason: format!("from address: {e}"),
                }
            })?)
            .to(to.parse().map_err(|e| NotifyError::InvalidAddress {
                reason: format!("to address: {e}"),
            })?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::Send {
                reason: format!("failed to build email: {e}"),
            })?;

        transport.send(&email).map_err(|e| NotifyError::Send {
            reason: format!("SMTP send failed: {e}"),
        })?;

        info!(to = %to, "Reply sent");
        Ok(())
    }
}

#[async_trait]
impl ReplySender for SmtpNotifier {
    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        self.send_email(to, subject, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MailboxConfig {
        MailboxConfig {
            imap_host: "imap.test.com".into(),
            imap_port: 993,
            smtp_host: "smtp.test.com".into(),
            smtp_port: 587,
            username: "user".into(),
            password: "pass".into(),
            from_address: "user@test.com".into(),
            poll_interval_secs: 60,
            allowed_senders: vec![],
        }
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected_before_sending() {
        let notifier = SmtpNotifier::new(config());
        let err = notifier
            .send_reply("not an address", "Re: hi", "body")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::InvalidAddress { .. }));
    }
}
