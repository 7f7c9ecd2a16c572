use std::sync::Arc;

use async_trait::async_trait;
use vmsentry_common::types::{Incident, NotificationConfig};

use crate::channels::SMS;
use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::NotificationChannel;

/// Provider-specific text message transport.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_text(&self, phone_numbers: &[String], text: &str) -> Result<()>;
}

/// Gateway that only logs; used when no SMS provider is configured.
pub struct LoggingSmsGateway;

#[async_trait]
impl SmsGateway for LoggingSmsGateway {
    async fn send_text(&self, phone_numbers: &[String], text: &str) -> Result<()> {
        tracing::info!(recipients = phone_numbers.len(), text, "SMS delivery simulated");
        Ok(())
    }
}

/// Generic HTTP SMS gateway: one JSON `POST {to, message}` per number,
/// authenticated with a bearer key.
pub struct HttpSmsGateway {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
}

impl HttpSmsGateway {
    pub fn new(gateway_url: &str, api_key: &str, timeout: std::time::Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            gateway_url: gateway_url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send_text(&self, phone_numbers: &[String], text: &str) -> Result<()> {
        for phone in phone_numbers {
            let payload = serde_json::json!({
                "to": phone,
                "message": text,
            });
            let resp = self
                .client
                .post(&self.gateway_url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(NotifyError::ApiError {
                    service: SMS.to_string(),
                    status: status.as_u16(),
                    body: truncate_string(&body, MAX_BODY_LENGTH),
                });
            }
        }
        Ok(())
    }
}

pub struct SmsChannel {
    gateway: Arc<dyn SmsGateway>,
}

impl SmsChannel {
    pub fn new(gateway: Arc<dyn SmsGateway>) -> Self {
        Self { gateway }
    }

    pub fn format_message(incident: &Incident) -> String {
        format!(
            "[VM Monitor] {severity} alert: {rule}, VM: {vm}, value: {value:.2}, threshold: {threshold:.2}",
            severity = incident.severity.label(),
            rule = incident.rule_name,
            vm = incident.entity_name,
            value = incident.trigger_value,
            threshold = incident.threshold,
        )
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    async fn send(&self, incident: &Incident, config: &NotificationConfig) -> Result<Option<String>> {
        let target = config
            .sms
            .as_ref()
            .filter(|s| s.enabled)
            .ok_or_else(|| NotifyError::ChannelDisabled(SMS.to_string()))?;
        if target.phone_numbers.is_empty() {
            return Err(NotifyError::InvalidConfig("no SMS phone numbers".to_string()));
        }

        let text = Self::format_message(incident);
        self.gateway.send_text(&target.phone_numbers, &text).await?;
        Ok(Some(format!("sent to {} number(s)", target.phone_numbers.len())))
    }

    fn channel_type(&self) -> &str {
        SMS
    }
}
