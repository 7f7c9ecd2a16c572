//! Engine-facing trait implementations over [`AlertStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vmsentry_alert::{EntityDirectory, EntityFilter, MetricAccessor, RuleRepository};
use vmsentry_common::types::{
    Aggregation, AlertCondition, AlertRule, ChannelResult, EntityRef, Incident,
};

use crate::store::AlertStore;

#[async_trait]
impl RuleRepository for AlertStore {
    async fn list_enabled_rules(&self) -> anyhow::Result<Vec<AlertRule>> {
        Ok(self.list_rules(Some(true)).await?)
    }

    async fn list_conditions(&self, rule_id: &str) -> anyhow::Result<Vec<AlertCondition>> {
        Ok(self.rule_conditions(rule_id).await?)
    }

    async fn upsert_incident(&self, incident: &Incident) -> anyhow::Result<()> {
        Ok(AlertStore::upsert_incident(self, incident).await?)
    }

    async fn find_open_incident(
        &self,
        rule_id: &str,
        entity_id: &str,
    ) -> anyhow::Result<Option<Incident>> {
        Ok(AlertStore::find_open_incident(self, rule_id, entity_id).await?)
    }

    async fn get_incident(&self, incident_id: &str) -> anyhow::Result<Option<Incident>> {
        Ok(AlertStore::get_incident(self, incident_id).await?)
    }

    async fn increment_trigger_count(
        &self,
        rule_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        Ok(self.record_rule_triggered(rule_id, at).await?)
    }

    async fn record_notifications(
        &self,
        incident_id: &str,
        results: &[ChannelResult],
    ) -> anyhow::Result<()> {
        Ok(self.append_notifications(incident_id, results).await?)
    }
}

#[async_trait]
impl EntityDirectory for AlertStore {
    async fn get_entity(&self, entity_id: &str) -> anyhow::Result<Option<EntityRef>> {
        Ok(self.get_vm(entity_id).await?)
    }

    async fn list_entities(&self, filter: &EntityFilter) -> anyhow::Result<Vec<EntityRef>> {
        Ok(self.list_vms(filter).await?)
    }
}

#[async_trait]
impl MetricAccessor for AlertStore {
    async fn get_value(
        &self,
        entity_id: &str,
        metric: &str,
        aggregation: Aggregation,
        window_secs: u64,
    ) -> anyhow::Result<Option<f64>> {
        Ok(self
            .aggregate_metric(entity_id, metric, aggregation, window_secs, Utc::now())
            .await?)
    }
}
