//! Offline fallback channel.
//!
//! [`SmtpNotifier`] sends real mail through Lettre; [`ConsoleNotifier`] only
//! logs, for development. [`EmailNotifier`] picks one at start-up.

use crate::contacts::Contact;
use crate::error::{NotifyError, Result};
use crate::recipients::Notification;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::future::Future;
use tracing::info;

/// Sends a notification to someone who is not connected.
pub trait OfflineNotifier: Send + Sync {
    /// Deliver `notification` to `contact`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Email`] if the message cannot be built or sent.
    fn notify(
        &self,
        contact: &Contact,
        notification: &Notification,
    ) -> impl Future<Output = Result<()>> + Send;
}

fn subject(notification: &Notification) -> String {
    format!("Journeys: {}", notification.message)
}

fn body(contact: &Contact, notification: &Notification) -> String {
    let greeting = contact.display_name.as_deref().unwrap_or("there");
    format!(
        "Hi {greeting},\n\n{}.\n\nJourney: {}\n",
        notification.message, notification.journey_id
    )
}

/// SMTP sender.
///
/// # Examples
///
/// ```ignore
/// use journey_relay_notifications::email::SmtpNotifier;
///
/// let notifier = SmtpNotifier::new(
///     "smtp.example.com".to_string(),
///     587,
///     "user".to_string(),
///     "app_password".to_string(),
///     "Journeys <noreply@example.com>".to_string(),
/// );
/// ```
#[derive(Clone)]
pub struct SmtpNotifier {
    smtp_server: String,
    smtp_port: u16,
    credentials: Credentials,
    from: String,
}

impl SmtpNotifier {
    /// Create a sender.
    #[must_use]
    pub fn new(
        smtp_server: String,
        smtp_port: u16,
        smtp_username: String,
        smtp_password: String,
        from: String,
    ) -> Self {
        Self {
            smtp_server,
            smtp_port,
            credentials: Credentials::new(smtp_username, smtp_password),
            from,
        }
    }

    /// A fresh transport per message; lettre's sync transport is used from a
    /// blocking task.
    fn build_transport(&self) -> Result<SmtpTransport> {
        Ok(SmtpTransport::relay(&self.smtp_server)
            .map_err(|e| NotifyError::Email(format!("SMTP relay error: {e}")))?
            .port(self.smtp_port)
            .credentials(self.credentials.clone())
            .build())
    }
}

impl OfflineNotifier for SmtpNotifier {
    async fn notify(&self, contact: &Contact, notification: &Notification) -> Result<()> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| NotifyError::Email(format!("Invalid from address: {e}")))?,
            )
            .to(contact
                .email
                .parse()
                .map_err(|e| NotifyError::Email(format!("Invalid to address: {e}")))?)
            .subject(subject(notification))
            .header(ContentType::TEXT_PLAIN)
            .body(body(contact, notification))
            .map_err(|e| NotifyError::Email(format!("Failed to build email: {e}")))?;

        let mailer = self.build_transport()?;

        tokio::task::spawn_blocking(move || {
            mailer
                .send(&email)
                .map_err(|e| NotifyError::Email(format!("Failed to send email: {e}")))
        })
        .await
        .map_err(|e| NotifyError::Email(format!("Email task failed: {e}")))?
        .map(|_| ())
    }
}

/// Logs messages instead of sending them.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl OfflineNotifier for ConsoleNotifier {
    async fn notify(&self, contact: &Contact, notification: &Notification) -> Result<()> {
        info!(
            to = %contact.email,
            recipient = %notification.recipient,
            event_type = %notification.event_type,
            subject = %subject(notification),
            "📧 Offline notification (development mode)"
        );
        Ok(())
    }
}

/// The notifier chosen by configuration.
#[derive(Clone)]
pub enum EmailNotifier {
    /// Real mail.
    Smtp(SmtpNotifier),
    /// Log only.
    Console(ConsoleNotifier),
}

impl OfflineNotifier for EmailNotifier {
    async fn notify(&self, contact: &Contact, notification: &Notification) -> Result<()> {
        match self {
            Self::Smtp(smtp) => smtp.notify(contact, notification).await,
            Self::Console(console) => console.notify(contact, notification).await,
        }
    }
}
