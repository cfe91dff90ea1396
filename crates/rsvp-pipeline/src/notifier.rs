//! Notification sinks and the notices they deliver.

use std::{future::Future, time::Duration};

use lettre::{
  AsyncSmtpTransport, AsyncTransport as _, Message, Tokio1Executor,
  message::{Mailbox, header::ContentType},
  transport::smtp::authentication::Credentials,
};
use reqwest::Client;
use rsvp_core::{Classify, model::RegistrationDetails};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{Error, Result};

// ─── Notices ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
  Confirmation,
  Cancellation,
}

/// A rendered message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
  pub kind:            NoticeKind,
  pub registration_id: i64,
  pub to_email:        String,
  pub to_name:         String,
  pub subject:         String,
  pub html:            String,
}

fn escape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}

fn event_block(d: &RegistrationDetails) -> String {
  let mut html = format!(
    "<h2>{}</h2>\n<p><strong>Date &amp; Time:</strong> {} at {}</p>\n\
     <p><strong>Location:</strong> {}</p>\n<p><strong>Category:</strong> {}</p>\n\
     <p><strong>Organizer:</strong> {}</p>\n",
    escape(&d.event_title),
    d.event_date.format("%Y-%m-%d"),
    d.event_time.format("%H:%M"),
    escape(d.event_location.as_deref().unwrap_or("Location TBD")),
    escape(d.event_category.as_deref().unwrap_or("General")),
    escape(d.organizer.as_deref().unwrap_or("Event Organizer")),
  );
  if let Some(description) = d.event_description.as_deref().filter(|s| !s.is_empty()) {
    html.push_str(&format!("<p><strong>Description:</strong><br>{}</p>\n", escape(description)));
  }
  html
}

impl Notice {
  pub fn confirmation(d: &RegistrationDetails) -> Self {
    let html = format!(
      "<html><body>\n<h1>Registration Confirmed!</h1>\n<p>Hello <strong>{}</strong>,</p>\n\
       <p>Your registration for the following event has been confirmed:</p>\n{}\
       <p>Please arrive 15 minutes early. Contact the organizer if you need to cancel.</p>\n\
       <p>We're excited to see you at the event!</p>\n\
       <p>This is an automated message. Please do not reply to this email.</p>\n</body></html>",
      escape(d.recipient_name()),
      event_block(d),
    );
    Self {
      kind: NoticeKind::Confirmation,
      registration_id: d.registration_id,
      to_email: d.email.clone(),
      to_name: d.recipient_name().to_owned(),
      subject: format!("Registration Confirmed: {}", d.event_title),
      html,
    }
  }

  pub fn cancellation(d: &RegistrationDetails) -> Self {
    let html = format!(
      "<html><body>\n<h1>Registration Cancelled</h1>\n<p>Hello <strong>{}</strong>,</p>\n\
       <p>Your registration for the following event has been cancelled:</p>\n{}\
       <p>If this was a mistake you can register again while places remain.</p>\n\
       <p>This is an automated message. Please do not reply to this email.</p>\n</body></html>",
      escape(d.recipient_name()),
      event_block(d),
    );
    Self {
      kind: NoticeKind::Cancellation,
      registration_id: d.registration_id,
      to_email: d.email.clone(),
      to_name: d.recipient_name().to_owned(),
      subject: format!("Registration Cancelled: {}", d.event_title),
      html,
    }
  }
}

// ─── Sink trait ──────────────────────────────────────────────────────────────

/// The notification sink. Callers wrap `send` in a timeout.
pub trait Notifier: Send + Sync + 'static {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  fn send<'a>(&'a self, notice: &'a Notice) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── SMTP ────────────────────────────────────────────────────────────────────

/// Connection settings for an SMTP submission server.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
  pub host:       String,
  #[serde(default = "default_smtp_port")]
  pub port:       u16,
  #[serde(default)]
  pub username:   String,
  #[serde(default)]
  pub password:   String,
  /// Falls back to `username` when empty.
  #[serde(default)]
  pub from_email: String,
  #[serde(default)]
  pub from_name:  String,
}

pub const fn default_smtp_port() -> u16 { 587 }

/// Sends notices over SMTP, upgrading the connection with STARTTLS.
#[derive(Clone)]
pub struct SmtpMailer {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  from:      Mailbox,
}

impl SmtpMailer {
  pub fn new(config: SmtpConfig, timeout: Duration) -> Result<Self> {
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
      .port(config.port)
      .timeout(Some(timeout));
    if !config.username.is_empty() {
      builder = builder.credentials(Credentials::new(config.username.clone(), config.password.clone()));
    }

    let from_email = if config.from_email.is_empty() { &config.username } else { &config.from_email };
    let from_name = Some(config.from_name.clone()).filter(|n| !n.is_empty());
    let from = Mailbox::new(from_name, from_email.parse()?);

    tracing::info!(host = %config.host, port = config.port, "smtp notifier configured");
    Ok(Self { transport: builder.build(), from })
  }

  fn message(&self, notice: &Notice) -> Result<Message> {
    let to = Mailbox::new(Some(notice.to_name.clone()), notice.to_email.parse()?);
    let message = Message::builder()
      .from(self.from.clone())
      .to(to)
      .subject(notice.subject.clone())
      .header(ContentType::TEXT_HTML)
      .body(notice.html.clone())?;
    Ok(message)
  }
}

impl Notifier for SmtpMailer {
  type Error = Error;

  async fn send(&self, notice: &Notice) -> Result<()> {
    let message = self.message(notice)?;
    self.transport.send(message).await?;
    tracing::info!(
      registration_id = notice.registration_id,
      kind = ?notice.kind,
      to = %notice.to_email,
      "notice sent"
    );
    Ok(())
  }
}

// ─── Mail relay ──────────────────────────────────────────────────────────────

/// Connection settings for an HTTP mail relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailRelayConfig {
  pub relay_url:  String,
  #[serde(default)]
  pub username:   String,
  #[serde(default)]
  pub password:   String,
  #[serde(default)]
  pub from_email: String,
  #[serde(default)]
  pub from_name:  String,
}

/// Sends notices as JSON to a mail relay endpoint.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct MailRelay {
  client: Client,
  config: MailRelayConfig,
}

impl MailRelay {
  pub fn new(config: MailRelayConfig, timeout: Duration) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, config })
  }

  fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    if self.config.username.is_empty() {
      req
    } else {
      req.basic_auth(&self.config.username, Some(&self.config.password))
    }
  }
}

impl Notifier for MailRelay {
  type Error = Error;

  async fn send(&self, notice: &Notice) -> Result<()> {
    let body = json!({
      "from":    { "email": self.config.from_email, "name": self.config.from_name },
      "to":      { "email": notice.to_email, "name": notice.to_name },
      "subject": notice.subject,
      "html":    notice.html,
    });

    let resp = self.auth(self.client.post(&self.config.relay_url)).json(&body).send().await?;
    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(Error::RelayStatus { status: status.as_u16(), body });
    }
    tracing::info!(
      registration_id = notice.registration_id,
      kind = ?notice.kind,
      to = %notice.to_email,
      "notice sent"
    );
    Ok(())
  }
}

// ─── Log-only sink ───────────────────────────────────────────────────────────

/// Logs notices instead of sending them. Used when no mail sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  type Error = Error;

  async fn send(&self, notice: &Notice) -> Result<()> {
    tracing::info!(
      registration_id = notice.registration_id,
      kind = ?notice.kind,
      to = %notice.to_email,
      subject = %notice.subject,
      "notice (log only, no mail sink configured)"
    );
    Ok(())
  }
}

// ─── Runtime choice ──────────────────────────────────────────────────────────

/// The sink selected by configuration.
#[derive(Clone)]
pub enum Mailer {
  Smtp(SmtpMailer),
  Relay(MailRelay),
  Log(LogNotifier),
}

impl Mailer {
  /// SMTP when a host is configured, else the relay when one is named, else
  /// the log sink.
  pub fn from_config(
    smtp: Option<SmtpConfig>,
    relay: Option<MailRelayConfig>,
    timeout: Duration,
  ) -> Result<Self> {
    if let Some(smtp) = smtp.filter(|c| !c.host.is_empty()) {
      return Ok(Self::Smtp(SmtpMailer::new(smtp, timeout)?));
    }
    match relay.filter(|c| !c.relay_url.is_empty()) {
      Some(config) => Ok(Self::Relay(MailRelay::new(config, timeout)?)),
      None => Ok(Self::Log(LogNotifier)),
    }
  }
}

impl Notifier for Mailer {
  type Error = Error;

  async fn send(&self, notice: &Notice) -> Result<()> {
    match self {
      Self::Smtp(smtp) => smtp.send(notice).await,
      Self::Relay(relay) => relay.send(notice).await,
      Self::Log(log) => log.send(notice).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, NaiveTime, Utc};
  use rsvp_core::model::RegistrationStatus;

  use super::*;

  fn details() -> RegistrationDetails {
    RegistrationDetails {
      registration_id:   9,
      status:            RegistrationStatus::Registered,
      registration_date: Utc::now(),
      email_sent:        false,
      email_sent_at:     None,
      notes:             None,
      user_id:           1,
      username:          "alice".into(),
      email:             "alice@example.com".into(),
      full_name:         Some("Alice Liddell".into()),
      event_id:          2,
      event_title:       "Tea <Party>".into(),
      event_description: None,
      event_category:    Some("Social".into()),
      event_location:    None,
      event_date:        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
      event_time:        NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
      organizer:         None,
    }
  }

  #[test]
  fn confirmation_renders_escaped_details() {
    let notice = Notice::confirmation(&details());
    assert_eq!(notice.kind, NoticeKind::Confirmation);
    assert_eq!(notice.subject, "Registration Confirmed: Tea <Party>");
    assert_eq!(notice.to_name, "Alice Liddell");
    assert!(notice.html.contains("Tea &lt;Party&gt;"));
    assert!(notice.html.contains("2026-05-04 at 16:00"));
    assert!(notice.html.contains("Location TBD"));
    assert!(!notice.html.contains("Description"));
  }

  #[test]
  fn cancellation_is_a_distinct_notice() {
    let notice = Notice::cancellation(&details());
    assert_eq!(notice.kind, NoticeKind::Cancellation);
    assert!(notice.subject.starts_with("Registration Cancelled"));
    assert!(notice.html.contains("has been cancelled"));
  }

  fn smtp_config() -> SmtpConfig {
    SmtpConfig {
      host:       "smtp.example.com".into(),
      port:       default_smtp_port(),
      username:   "events@example.com".into(),
      password:   "hunter2".into(),
      from_email: String::new(),
      from_name:  "Event Management System".into(),
    }
  }

  #[test]
  fn mailer_without_relay_logs() {
    let mailer = Mailer::from_config(None, None, Duration::from_secs(1)).unwrap();
    assert!(matches!(mailer, Mailer::Log(_)));
    let empty = MailRelayConfig::default();
    assert!(matches!(
      Mailer::from_config(None, Some(empty), Duration::from_secs(1)).unwrap(),
      Mailer::Log(_)
    ));
  }

  #[tokio::test]
  async fn smtp_host_takes_precedence_over_the_relay() {
    let relay = MailRelayConfig { relay_url: "http://relay.local/send".into(), ..Default::default() };
    let mailer = Mailer::from_config(Some(smtp_config()), Some(relay), Duration::from_secs(1)).unwrap();
    assert!(matches!(mailer, Mailer::Smtp(_)));
  }

  #[tokio::test]
  async fn smtp_message_carries_the_rendered_notice() {
    let mailer = SmtpMailer::new(smtp_config(), Duration::from_secs(1)).unwrap();
    let message = mailer.message(&Notice::confirmation(&details())).unwrap();
    let raw = String::from_utf8_lossy(&message.formatted()).into_owned();

    let header = |name: &str| raw.lines().find(|l| l.starts_with(name)).unwrap_or_default().to_owned();

    assert!(header("From:").contains("Event Management System"), "{raw}");
    assert!(header("From:").contains("<events@example.com>"), "{raw}");
    assert!(header("To:").contains("<alice@example.com>"), "{raw}");
    assert!(raw.contains("Subject: Registration Confirmed: Tea <Party>"), "{raw}");
    assert!(raw.contains("Content-Type: text/html"), "{raw}");
  }

  #[tokio::test]
  async fn unaddressable_recipient_is_permanent() {
    let mailer = SmtpMailer::new(smtp_config(), Duration::from_secs(1)).unwrap();
    let mut notice = Notice::confirmation(&details());
    notice.to_email = "not an address".into();

    let err = mailer.send(&notice).await.unwrap_err();
    assert_eq!(err.kind(), rsvp_core::ErrorKind::PermanentDelivery);
  }
}
