use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use vmsentry_common::types::{AlertRule, EntityRef, Incident, IncidentStatus};

use crate::error::{AlertError, Result};
use crate::evaluator::{Evaluation, MetricSample};
use crate::RuleRepository;

/// Operator name recorded on incidents the engine resolves itself.
pub const SYSTEM_OPERATOR: &str = "system";
/// Resolution note for incidents closed because the condition cleared.
pub const AUTO_RESOLUTION: &str = "auto-recovered";

/// Per-rule cooldown anchors.
///
/// The anchor is set whenever an incident of the rule opens or resolves and
/// only ever moves forward. It lives in memory and is lost on restart.
#[derive(Default)]
pub struct TriggerHistory {
    last: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TriggerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_triggered(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rule_id)
            .copied()
    }

    pub fn stamp(&self, rule_id: &str, at: DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = last.entry(rule_id.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    /// `true` when no anchor exists or at least `cooldown_secs` have elapsed.
    pub fn cooldown_expired(&self, rule_id: &str, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
        match self.last_triggered(rule_id) {
            None => true,
            Some(last) => {
                let cooldown = chrono::Duration::seconds(i64::try_from(cooldown_secs).unwrap_or(i64::MAX));
                now.signed_duration_since(last) >= cooldown
            }
        }
    }

    pub fn clear(&self) {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// What happened to one rule/VM pair during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A new active incident was created.
    Opened(Incident),
    /// Conditions hold but an incident is already open.
    Suppressed,
    /// The open incident was closed because conditions cleared.
    Resolved(Incident),
    /// Conditions hold but the rule is still cooling down.
    CooldownActive,
    /// Nothing to do.
    Idle,
}

/// Applies evaluation outcomes and operator commands to incidents.
///
/// Every transition runs under one lock so the find-then-write sequence
/// cannot interleave with an operator acknowledging or resolving the same
/// incident.
pub struct LifecycleManager {
    repo: Arc<dyn RuleRepository>,
    history: TriggerHistory,
    transitions: tokio::sync::Mutex<()>,
}

impl LifecycleManager {
    pub fn new(repo: Arc<dyn RuleRepository>) -> Self {
        Self {
            repo,
            history: TriggerHistory::new(),
            transitions: tokio::sync::Mutex::new(()),
        }
    }

    pub fn history(&self) -> &TriggerHistory {
        &self.history
    }

    /// Moves the rule/VM pair to its next state.
    ///
    /// `may_open` is the rule's cooldown gate for this pass; it only guards
    /// the none-to-active edge.
    pub async fn apply(
        &self,
        rule: &AlertRule,
        entity: &EntityRef,
        evaluation: &Evaluation,
        may_open: bool,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let _guard = self.transitions.lock().await;
        let open = self
            .repo
            .find_open_incident(&rule.id, &entity.id)
            .await
            .map_err(AlertError::Repository)?;

        match (open, evaluation.triggered) {
            (Some(_), true) => Ok(Transition::Suppressed),
            (None, false) => Ok(Transition::Idle),
            (Some(mut incident), false) => {
                incident.mark_resolved(now, SYSTEM_OPERATOR, Some(AUTO_RESOLUTION.to_string()));
                self.repo
                    .upsert_incident(&incident)
                    .await
                    .map_err(AlertError::Repository)?;
                self.history.stamp(&rule.id, now);
                tracing::info!(
                    incident_id = %incident.id,
                    rule = %rule.name,
                    entity = %entity.name,
                    duration_secs = incident.duration_secs.unwrap_or_default(),
                    "Alert auto-resolved"
                );
                Ok(Transition::Resolved(incident))
            }
            (None, true) => {
                if !may_open {
                    tracing::debug!(rule = %rule.name, entity = %entity.name, "Alert suppressed by cooldown");
                    return Ok(Transition::CooldownActive);
                }
                let Some(sample) = evaluation.sample.as_ref() else {
                    return Ok(Transition::Idle);
                };
                let incident = open_incident(rule, entity, sample, now);
                self.repo
                    .upsert_incident(&incident)
                    .await
                    .map_err(AlertError::Repository)?;
                self.history.stamp(&rule.id, now);

                if let Err(e) = self.repo.increment_trigger_count(&rule.id, now).await {
                    tracing::warn!(rule_id = %rule.id, error = %e, "Failed to update rule trigger count");
                }
                tracing::info!(
                    incident_id = %incident.id,
                    rule = %rule.name,
                    entity = %entity.name,
                    severity = %incident.severity,
                    condition = %incident.condition_desc,
                    "Alert triggered"
                );
                Ok(Transition::Opened(incident))
            }
        }
    }

    /// active -> acknowledged. Any other source state is rejected.
    pub async fn acknowledge(
        &self,
        incident_id: &str,
        operator: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let _guard = self.transitions.lock().await;
        let mut incident = self.load(incident_id).await?;
        if incident.status != IncidentStatus::Active {
            return Err(AlertError::InvalidTransition {
                id: incident.id,
                from: incident.status,
                to: IncidentStatus::Acknowledged,
            });
        }
        incident.mark_acknowledged(now, operator, note);
        self.repo
            .upsert_incident(&incident)
            .await
            .map_err(AlertError::Repository)?;
        tracing::info!(incident_id = %incident.id, operator, "Alert acknowledged");
        Ok(incident)
    }

    /// active|acknowledged -> resolved. Restarts the rule's cooldown.
    pub async fn resolve(
        &self,
        incident_id: &str,
        operator: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let _guard = self.transitions.lock().await;
        let mut incident = self.load(incident_id).await?;
        if !incident.status.is_open() {
            return Err(AlertError::InvalidTransition {
                id: incident.id,
                from: incident.status,
                to: IncidentStatus::Resolved,
            });
        }
        incident.mark_resolved(now, operator, note);
        self.repo
            .upsert_incident(&incident)
            .await
            .map_err(AlertError::Repository)?;
        self.history.stamp(&incident.rule_id, now);
        tracing::info!(incident_id = %incident.id, operator, "Alert resolved");
        Ok(incident)
    }

    async fn load(&self, incident_id: &str) -> Result<Incident> {
        self.repo
            .get_incident(incident_id)
            .await
            .map_err(AlertError::Repository)?
            .ok_or_else(|| AlertError::IncidentNotFound(incident_id.to_string()))
    }
}

fn open_incident(
    rule: &AlertRule,
    entity: &EntityRef,
    sample: &MetricSample,
    now: DateTime<Utc>,
) -> Incident {
    Incident {
        id: vmsentry_common::id::next_id(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        entity_id: entity.id.clone(),
        entity_name: entity.name.clone(),
        cluster_id: entity.cluster_id.clone(),
        metric: sample.metric.clone(),
        severity: rule.severity,
        trigger_value: sample.value,
        threshold: sample.threshold,
        condition_desc: sample.condition_desc.clone(),
        status: IncidentStatus::Active,
        triggered_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        acknowledge_note: None,
        resolved_at: None,
        resolved_by: None,
        resolution: None,
        duration_secs: None,
        snapshot: entity.snapshot(now),
        notifications: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}
