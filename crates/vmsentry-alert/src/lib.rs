//! Alert rule evaluation engine for the VM fleet.
//!
//! The [`engine::AlertEngine`] periodically walks a cached snapshot of the
//! enabled rules, expands each rule's scope into concrete VMs, evaluates the
//! rule's threshold conditions against live metrics and drives the incident
//! lifecycle (open, suppress, auto-resolve, cooldown). New incidents are
//! handed to an [`IncidentNotifier`] without waiting for delivery.
//!
//! Storage, the metric source and the notification transports are external
//! collaborators reached through the traits defined here.

pub mod cache;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod lifecycle;
pub mod memory;
pub mod scope;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vmsentry_common::types::{
    Aggregation, AlertCondition, AlertRule, ChannelResult, EntityRef, Incident,
    NotificationConfig,
};

/// Source of aggregated metric values.
///
/// Implementations return `Ok(None)` when no data exists for the requested
/// window. The evaluator treats `None`, errors and timeouts alike: the
/// condition is false.
#[async_trait]
pub trait MetricAccessor: Send + Sync {
    async fn get_value(
        &self,
        entity_id: &str,
        metric: &str,
        aggregation: Aggregation,
        window_secs: u64,
    ) -> anyhow::Result<Option<f64>>;
}

/// Persistent store for rules, their conditions and incidents.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// All enabled, non-deleted rules.
    async fn list_enabled_rules(&self) -> anyhow::Result<Vec<AlertRule>>;

    /// Conditions of one rule, ordered by `sort_order`.
    async fn list_conditions(&self, rule_id: &str) -> anyhow::Result<Vec<AlertCondition>>;

    /// Inserts the incident or overwrites the stored row with the same id.
    ///
    /// An update leaves the stored notification outcomes untouched; they
    /// only change through [`record_notifications`](Self::record_notifications).
    async fn upsert_incident(&self, incident: &Incident) -> anyhow::Result<()>;

    /// The unresolved (active or acknowledged) incident for a rule/VM pair.
    async fn find_open_incident(
        &self,
        rule_id: &str,
        entity_id: &str,
    ) -> anyhow::Result<Option<Incident>>;

    async fn get_incident(&self, incident_id: &str) -> anyhow::Result<Option<Incident>>;

    /// Bumps the rule's trigger counter and last-triggered timestamp.
    async fn increment_trigger_count(&self, rule_id: &str, at: DateTime<Utc>)
        -> anyhow::Result<()>;

    /// Appends per-channel notification outcomes to the incident.
    async fn record_notifications(
        &self,
        incident_id: &str,
        results: &[ChannelResult],
    ) -> anyhow::Result<()>;
}

/// Filter used by the scope resolver when listing VMs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityFilter {
    All,
    Group(String),
    Cluster(String),
    Host(String),
    Datacenter(String),
}

/// Inventory lookup for monitored VMs. Deleted VMs are never returned.
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    async fn get_entity(&self, entity_id: &str) -> anyhow::Result<Option<EntityRef>>;

    async fn list_entities(&self, filter: &EntityFilter) -> anyhow::Result<Vec<EntityRef>>;
}

/// Receives newly opened incidents for delivery.
///
/// `notify` must return promptly; delivery happens elsewhere and the engine
/// never waits for it.
pub trait IncidentNotifier: Send + Sync {
    fn notify(&self, incident: Incident, config: NotificationConfig);
}

/// Time source for the engine, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
