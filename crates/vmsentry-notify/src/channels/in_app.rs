use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use vmsentry_common::types::{Incident, NotificationConfig, Severity};

use crate::channels::IN_APP;
use crate::error::{NotifyError, Result};
use crate::NotificationChannel;

/// Event pushed to connected viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppEvent {
    pub incident_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub vm_id: String,
    pub vm_name: String,
    pub severity: Severity,
    pub metric: String,
    pub trigger_value: f64,
    pub threshold: f64,
    pub message: String,
    /// Target users; empty means every viewer.
    pub users: Vec<String>,
    pub triggered_at: DateTime<Utc>,
}

impl InAppEvent {
    pub fn from_incident(incident: &Incident, users: Vec<String>) -> Self {
        Self {
            incident_id: incident.id.clone(),
            rule_id: incident.rule_id.clone(),
            rule_name: incident.rule_name.clone(),
            vm_id: incident.entity_id.clone(),
            vm_name: incident.entity_name.clone(),
            severity: incident.severity,
            metric: incident.metric.clone(),
            trigger_value: incident.trigger_value,
            threshold: incident.threshold,
            message: format!("{}: {}", incident.entity_name, incident.condition_desc),
            users,
            triggered_at: incident.triggered_at,
        }
    }
}

/// Push transport for in-app events. Returns how many viewers received it.
#[async_trait]
pub trait InAppPublisher: Send + Sync {
    async fn publish(&self, event: InAppEvent) -> Result<usize>;
}

/// In-process hub; viewers (e.g. websocket sessions) hold a receiver.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<InAppEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InAppEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl InAppPublisher for BroadcastPublisher {
    async fn publish(&self, event: InAppEvent) -> Result<usize> {
        // No connected viewer is not a delivery failure.
        Ok(self.tx.send(event).unwrap_or(0))
    }
}

pub struct InAppChannel {
    publisher: Arc<dyn InAppPublisher>,
}

impl InAppChannel {
    pub fn new(publisher: Arc<dyn InAppPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    async fn send(&self, incident: &Incident, config: &NotificationConfig) -> Result<Option<String>> {
        let target = config.in_app.clone().unwrap_or_default();
        if !target.enabled {
            return Err(NotifyError::ChannelDisabled(IN_APP.to_string()));
        }
        let viewers = self
            .publisher
            .publish(InAppEvent::from_incident(incident, target.users))
            .await?;
        Ok(Some(format!("delivered to {viewers} viewer(s)")))
    }

    fn channel_type(&self) -> &str {
        IN_APP
    }
}
