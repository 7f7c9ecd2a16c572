//! In-memory collaborators for embedding the engine without a database and
//! for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vmsentry_common::types::{
    Aggregation, AlertCondition, AlertRule, ChannelResult, EntityRef, Incident,
};

use crate::{Clock, EntityDirectory, EntityFilter, MetricAccessor, RuleRepository};

#[derive(Default)]
struct StoreState {
    rules: BTreeMap<String, AlertRule>,
    conditions: HashMap<String, Vec<AlertCondition>>,
    incidents: Vec<Incident>,
    entities: BTreeMap<String, EntityRef>,
    groups: HashMap<String, Vec<String>>,
}

/// Rule repository and VM directory backed by process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }

    /// Makes every subsequent call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert_rule(&self, rule: AlertRule, conditions: Vec<AlertCondition>) {
        let mut state = self.state();
        state.conditions.insert(rule.id.clone(), conditions);
        state.rules.insert(rule.id.clone(), rule);
    }

    pub fn remove_rule(&self, rule_id: &str) {
        let mut state = self.state();
        state.rules.remove(rule_id);
        state.conditions.remove(rule_id);
    }

    pub fn rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.state().rules.get(rule_id).cloned()
    }

    pub fn insert_entity(&self, entity: EntityRef) {
        self.state().entities.insert(entity.id.clone(), entity);
    }

    pub fn remove_entity(&self, entity_id: &str) {
        self.state().entities.remove(entity_id);
    }

    pub fn add_group_member(&self, group_id: &str, entity_id: &str) {
        self.state()
            .groups
            .entry(group_id.to_string())
            .or_default()
            .push(entity_id.to_string());
    }

    /// Every incident ever stored, in insertion order.
    pub fn incidents(&self) -> Vec<Incident> {
        self.state().incidents.clone()
    }

    pub fn incidents_for(&self, rule_id: &str, entity_id: &str) -> Vec<Incident> {
        self.state()
            .incidents
            .iter()
            .filter(|i| i.rule_id == rule_id && i.entity_id == entity_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RuleRepository for InMemoryStore {
    async fn list_enabled_rules(&self) -> anyhow::Result<Vec<AlertRule>> {
        self.check_available()?;
        Ok(self
            .state()
            .rules
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn list_conditions(&self, rule_id: &str) -> anyhow::Result<Vec<AlertCondition>> {
        self.check_available()?;
        let mut conditions = self
            .state()
            .conditions
            .get(rule_id)
            .cloned()
            .unwrap_or_default();
        conditions.sort_by_key(|c| c.sort_order);
        Ok(conditions)
    }

    async fn upsert_incident(&self, incident: &Incident) -> anyhow::Result<()> {
        self.check_available()?;
        let mut state = self.state();
        match state.incidents.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => {
                let notifications = std::mem::take(&mut existing.notifications);
                *existing = Incident {
                    notifications,
                    ..incident.clone()
                };
            }
            None => state.incidents.push(incident.clone()),
        }
        Ok(())
    }

    async fn find_open_incident(
        &self,
        rule_id: &str,
        entity_id: &str,
    ) -> anyhow::Result<Option<Incident>> {
        self.check_available()?;
        Ok(self
            .state()
            .incidents
            .iter()
            .find(|i| i.rule_id == rule_id && i.entity_id == entity_id && i.status.is_open())
            .cloned())
    }

    async fn get_incident(&self, incident_id: &str) -> anyhow::Result<Option<Incident>> {
        self.check_available()?;
        Ok(self
            .state()
            .incidents
            .iter()
            .find(|i| i.id == incident_id)
            .cloned())
    }

    async fn increment_trigger_count(&self, rule_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.check_available()?;
        let mut state = self.state();
        let rule = state
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| anyhow!("rule not found: {rule_id}"))?;
        rule.trigger_count += 1;
        rule.last_triggered_at = Some(at);
        Ok(())
    }

    async fn record_notifications(
        &self,
        incident_id: &str,
        results: &[ChannelResult],
    ) -> anyhow::Result<()> {
        self.check_available()?;
        let mut state = self.state();
        let incident = state
            .incidents
            .iter_mut()
            .find(|i| i.id == incident_id)
            .ok_or_else(|| anyhow!("incident not found: {incident_id}"))?;
        incident.notifications.extend_from_slice(results);
        Ok(())
    }
}

#[async_trait]
impl EntityDirectory for InMemoryStore {
    async fn get_entity(&self, entity_id: &str) -> anyhow::Result<Option<EntityRef>> {
        self.check_available()?;
        Ok(self.state().entities.get(entity_id).cloned())
    }

    async fn list_entities(&self, filter: &EntityFilter) -> anyhow::Result<Vec<EntityRef>> {
        self.check_available()?;
        let state = self.state();
        let entities = match filter {
            EntityFilter::All => state.entities.values().cloned().collect(),
            EntityFilter::Group(group_id) => state
                .groups
                .get(group_id)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| state.entities.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
            EntityFilter::Cluster(id) => state
                .entities
                .values()
                .filter(|e| e.cluster_id.as_deref() == Some(id.as_str()))
                .cloned()
                .collect(),
            EntityFilter::Host(id) => state
                .entities
                .values()
                .filter(|e| e.host_id.as_deref() == Some(id.as_str()))
                .cloned()
                .collect(),
            EntityFilter::Datacenter(id) => state
                .entities
                .values()
                .filter(|e| e.datacenter_id.as_deref() == Some(id.as_str()))
                .cloned()
                .collect(),
        };
        Ok(entities)
    }
}

/// Metric source returning fixed values per (VM, metric).
#[derive(Default)]
pub struct StaticMetrics {
    values: Mutex<HashMap<(String, String), f64>>,
    failing: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entity_id: &str, metric: &str, value: f64) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((entity_id.to_string(), metric.to_string()), value);
    }

    /// Removes the value so lookups report no data.
    pub fn clear(&self, entity_id: &str, metric: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(entity_id.to_string(), metric.to_string()));
    }

    /// Makes lookups for this pair return an error.
    pub fn fail(&self, entity_id: &str, metric: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((entity_id.to_string(), metric.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricAccessor for StaticMetrics {
    async fn get_value(
        &self,
        entity_id: &str,
        metric: &str,
        _aggregation: Aggregation,
        _window_secs: u64,
    ) -> anyhow::Result<Option<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (entity_id.to_string(), metric.to_string());
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
        {
            bail!("metric backend error for {entity_id}/{metric}");
        }
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied())
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
