use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use sha2::Sha256;
use vmsentry_common::types::{Incident, NotificationConfig};

use crate::channels::WEBHOOK;
use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::NotificationChannel;

/// Lowercase hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Unix seconds at signing time.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

type HmacSha256 = Hmac<Sha256>;

/// Signs `body` with `secret` and returns the lowercase hex digest.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Signing(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Receiver-side check of a [`SIGNATURE_HEADER`] value. Constant time.
///
/// ```
/// use vmsentry_notify::channels::webhook::{sign_payload, verify_signature};
///
/// let sig = sign_payload("s3cret", b"{\"id\":\"1\"}").unwrap();
/// assert!(verify_signature("s3cret", b"{\"id\":\"1\"}", &sig));
/// assert!(!verify_signature("other", b"{\"id\":\"1\"}", &sig));
/// ```
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// JSON body posted to webhook endpoints.
pub fn build_payload(incident: &Incident, now: DateTime<Utc>) -> Value {
    serde_json::json!({
        "id": incident.id,
        "ruleId": incident.rule_id,
        "ruleName": incident.rule_name,
        "severity": incident.severity,
        "status": incident.status,
        "metric": incident.metric,
        "triggerValue": incident.trigger_value,
        "threshold": incident.threshold,
        "condition": incident.condition_desc,
        "vmId": incident.entity_id,
        "vmName": incident.entity_name,
        "triggeredAt": incident.triggered_at.to_rfc3339(),
        "timestamp": now.to_rfc3339(),
    })
}

pub struct WebhookChannel {
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn parse_method(method: Option<&str>) -> Result<Method> {
    match method.map(str::trim) {
        None | Some("") => Ok(Method::POST),
        Some(m) if m.eq_ignore_ascii_case("POST") => Ok(Method::POST),
        Some(m) if m.eq_ignore_ascii_case("PUT") => Ok(Method::PUT),
        Some(other) => Err(NotifyError::InvalidConfig(format!(
            "unsupported webhook method '{other}'"
        ))),
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, incident: &Incident, config: &NotificationConfig) -> Result<Option<String>> {
        let target = config
            .webhook
            .as_ref()
            .filter(|w| w.enabled)
            .ok_or_else(|| NotifyError::ChannelDisabled(WEBHOOK.to_string()))?;
        if target.url.trim().is_empty() {
            return Err(NotifyError::InvalidConfig("webhook url is empty".to_string()));
        }
        let method = parse_method(target.method.as_deref())?;

        let now = Utc::now();
        let body = serde_json::to_vec(&build_payload(incident, now))?;

        let mut request = self
            .client
            .request(method, target.url.as_str())
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(secret) = target.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request
                .header(SIGNATURE_HEADER, sign_payload(secret, &body)?)
                .header(TIMESTAMP_HEADER, now.timestamp().to_string());
        }

        let resp = request.body(body).send().await?;
        let status = resp.status();
        if status.is_success() {
            tracing::debug!(incident_id = %incident.id, url = %target.url, status = %status, "Webhook delivered");
            return Ok(Some(format!("HTTP {}", status.as_u16())));
        }

        let text = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("[failed to read response body: {e}]"));
        Err(NotifyError::ApiError {
            service: WEBHOOK.to_string(),
            status: status.as_u16(),
            body: truncate_string(&text, MAX_BODY_LENGTH),
        })
    }

    fn channel_type(&self) -> &str {
        WEBHOOK
    }
}
