use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use vmsentry_common::types::{Incident, NotificationConfig};

use crate::channels::EMAIL;
use crate::error::{NotifyError, Result};
use crate::utils::escape_html;
use crate::NotificationChannel;

/// SMTP-style transport for HTML mail.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_html(&self, to: &[String], cc: &[String], subject: &str, html: &str) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        tls: bool,
    ) -> Result<Self> {
        let builder = if tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| NotifyError::SmtpError(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        let mut builder = builder.port(port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let from = from
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidConfig(format!("invalid sender address '{from}': {e}")))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| NotifyError::InvalidConfig(format!("invalid email address '{address}': {e}")))
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send_html(&self, to: &[String], cc: &[String], subject: &str, html: &str) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for address in to {
            builder = builder.to(mailbox(address)?);
        }
        for address in cc {
            builder = builder.cc(mailbox(address)?);
        }
        let message = builder
            .body(html.to_string())
            .map_err(|e| NotifyError::SmtpError(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::SmtpError(e.to_string()))?;
        Ok(())
    }
}

pub struct EmailChannel {
    mailer: Option<Arc<dyn MailSender>>,
}

impl EmailChannel {
    /// `mailer` is `None` when SMTP is not configured; sends then fail.
    pub fn new(mailer: Option<Arc<dyn MailSender>>) -> Self {
        Self { mailer }
    }

    pub fn subject(incident: &Incident) -> String {
        format!("[{}] VM alert: {}", incident.severity.label(), incident.rule_name)
    }

    pub fn render_body(incident: &Incident) -> String {
        let color = incident.severity.color();
        let rows = [
            ("Rule", escape_html(&incident.rule_name)),
            ("VM", escape_html(&incident.entity_name)),
            ("Metric", escape_html(&incident.metric)),
            ("Value", format!("{:.2}", incident.trigger_value)),
            ("Threshold", format!("{:.2}", incident.threshold)),
            ("Condition", escape_html(&incident.condition_desc)),
            (
                "Triggered at",
                incident.triggered_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ),
        ];
        let rows: String = rows
            .iter()
            .map(|(label, value)| {
                format!("<tr><td style=\"padding:4px 12px 4px 0;color:#666\">{label}</td><td>{value}</td></tr>")
            })
            .collect();

        format!(
            "<html><body style=\"font-family:Arial,sans-serif\">\
             <div style=\"border-left:6px solid {color};padding:12px\">\
             <h2 style=\"color:{color};margin:0 0 12px 0\">[{label}] {rule}</h2>\
             <table>{rows}</table>\
             </div></body></html>",
            label = incident.severity.label(),
            rule = escape_html(&incident.rule_name),
        )
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, incident: &Incident, config: &NotificationConfig) -> Result<Option<String>> {
        let target = config
            .email
            .as_ref()
            .filter(|e| e.enabled)
            .ok_or_else(|| NotifyError::ChannelDisabled(EMAIL.to_string()))?;
        if target.recipients.is_empty() {
            return Err(NotifyError::InvalidConfig("no email recipients".to_string()));
        }
        let mailer = self
            .mailer
            .as_ref()
            .ok_or_else(|| NotifyError::InvalidConfig("SMTP is not configured".to_string()))?;

        mailer
            .send_html(
                &target.recipients,
                &target.cc,
                &Self::subject(incident),
                &Self::render_body(incident),
            )
            .await?;
        Ok(Some(format!("sent to {} recipient(s)", target.recipients.len())))
    }

    fn channel_type(&self) -> &str {
        EMAIL
    }
}
