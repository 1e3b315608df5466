//! Notification surfaces — where dispatch results end up.

pub mod smtp;

use async_trait::async_trait;
use tracing::info;

use crate::dispatch::Notification;
use crate::error::NotifyError;

pub use smtp::SmtpNotifier;

/// A surface that shows notifications to the operator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sends drafted replies back to the original sender.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

/// Renders notifications into the structured log.
///
/// Stands in for a desktop notification surface; anything tailing the log
/// sees the same title/message/context triple a desktop toast would show.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            id = %notification.id,
            title = %notification.title,
            message = %notification.message,
            context = %notification.context,
            "notification"
        );
        Ok(())
    }
}
