// ABOUTME: Digest delivery: the Notifier trait, an SMTP implementation and a log-only fallback.
// ABOUTME: Delivery is attempted once per scan; failures are reported, never retried.

use std::time::Duration;

use chrono::Local;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, warn};

use crate::config::SmtpSettings;
use crate::digest::Digest;
use crate::error::NotifyError;
use crate::models::ChangeRecord;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel name reported by [`LogNotifier`].
pub const LOG_CHANNEL: &str = "log";

/// Delivers the changes found by one scan.
pub trait Notifier: Send + Sync {
    /// Sends one digest covering `changes`. Called only with a non-empty slice.
    fn notify(&self, changes: &[ChangeRecord]) -> Result<(), NotifyError>;

    /// Short channel name for logs and summaries.
    fn channel(&self) -> &'static str;
}

/// Sends the digest as a multipart plain/HTML email over STARTTLS.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    settings: SmtpSettings,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    /// Validates the settings and addresses. No connection is made here.
    pub fn new(settings: SmtpSettings) -> Result<Self, NotifyError> {
        if !settings.is_configured() {
            return Err(NotifyError::NotConfigured);
        }
        let from = parse_mailbox(&settings.from)?;
        let to = parse_mailbox(&settings.to)?;
        Ok(Self { settings, from, to })
    }

    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    /// Builds the email for `digest` without sending it.
    pub fn build_message(&self, digest: &Digest) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(digest.subject())
            .multipart(MultiPart::alternative_plain_html(digest.text(), digest.html()))
            .map_err(|e| NotifyError::Build(e.to_string()))
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        let transport = SmtpTransport::starttls_relay(&self.settings.server)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .port(self.settings.port)
            .credentials(Credentials::new(
                self.settings.username.clone(),
                self.settings.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(transport)
    }
}

impl Notifier for SmtpNotifier {
    fn notify(&self, changes: &[ChangeRecord]) -> Result<(), NotifyError> {
        let digest = Digest::build(changes, Local::now());
        let message = self.build_message(&digest)?;

        info!(
            server = %self.settings.server,
            port = self.settings.port,
            changes = digest.len(),
            "sending digest email"
        );
        self.transport()?
            .send(&message)
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        info!(to = %self.settings.to, "digest email sent");
        Ok(())
    }

    fn channel(&self) -> &'static str {
        "smtp"
    }
}

/// Writes the digest to the log. Used when email is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, changes: &[ChangeRecord]) -> Result<(), NotifyError> {
        let digest = Digest::build(changes, Local::now());
        warn!("email not configured; logging digest instead");
        info!(subject = %digest.subject(), "\n{}", digest.text());
        Ok(())
    }

    fn channel(&self) -> &'static str {
        LOG_CHANNEL
    }
}

/// Picks SMTP when it is configured, otherwise the log fallback.
pub fn notifier_from_settings(settings: &SmtpSettings) -> Result<Box<dyn Notifier>, NotifyError> {
    if settings.is_configured() {
        Ok(Box::new(SmtpNotifier::new(settings.clone())?))
    } else {
        Ok(Box::new(LogNotifier))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse::<Mailbox>().map_err(|e| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}
