use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;
use vmsentry_common::types::{ChannelResult, Incident, IncidentStatus};

use crate::entities::alert_record::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::{from_db_time, parse_column, to_db_time, AlertStore};

/// Aggregate view over stored incidents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentStats {
    pub total: u64,
    pub active: u64,
    pub acknowledged: u64,
    pub resolved: u64,
    pub by_severity: BTreeMap<String, u64>,
    /// Mean `duration_secs` over resolved incidents.
    pub mean_time_to_resolve_secs: Option<f64>,
}

const OPEN_STATUSES: [IncidentStatus; 2] = [IncidentStatus::Active, IncidentStatus::Acknowledged];

fn to_incident(m: alert_record::Model) -> Result<Incident> {
    Ok(Incident {
        severity: parse_column("severity", &m.severity)?,
        status: parse_column("status", &m.status)?,
        snapshot: serde_json::from_str(&m.snapshot_json)?,
        notifications: serde_json::from_str(&m.notifications_json)?,
        triggered_at: from_db_time(m.triggered_at),
        acknowledged_at: m.acknowledged_at.map(from_db_time),
        resolved_at: m.resolved_at.map(from_db_time),
        created_at: from_db_time(m.created_at),
        updated_at: from_db_time(m.updated_at),
        id: m.id,
        rule_id: m.rule_id,
        rule_name: m.rule_name,
        entity_id: m.vm_id,
        entity_name: m.vm_name,
        cluster_id: m.cluster_id,
        metric: m.metric,
        trigger_value: m.trigger_value,
        threshold: m.threshold,
        condition_desc: m.condition_desc,
        acknowledged_by: m.acknowledged_by,
        acknowledge_note: m.acknowledge_note,
        resolved_by: m.resolved_by,
        resolution: m.resolution,
        duration_secs: m.duration_secs,
    })
}

fn to_active_model(incident: &Incident) -> Result<alert_record::ActiveModel> {
    Ok(alert_record::ActiveModel {
        id: Set(incident.id.clone()),
        rule_id: Set(incident.rule_id.clone()),
        rule_name: Set(incident.rule_name.clone()),
        vm_id: Set(incident.entity_id.clone()),
        vm_name: Set(incident.entity_name.clone()),
        cluster_id: Set(incident.cluster_id.clone()),
        metric: Set(incident.metric.clone()),
        severity: Set(incident.severity.to_string()),
        trigger_value: Set(incident.trigger_value),
        threshold: Set(incident.threshold),
        condition_desc: Set(incident.condition_desc.clone()),
        status: Set(incident.status.to_string()),
        triggered_at: Set(to_db_time(incident.triggered_at)),
        acknowledged_at: Set(incident.acknowledged_at.map(to_db_time)),
        acknowledged_by: Set(incident.acknowledged_by.clone()),
        acknowledge_note: Set(incident.acknowledge_note.clone()),
        resolved_at: Set(incident.resolved_at.map(to_db_time)),
        resolved_by: Set(incident.resolved_by.clone()),
        resolution: Set(incident.resolution.clone()),
        duration_secs: Set(incident.duration_secs),
        snapshot_json: Set(serde_json::to_string(&incident.snapshot)?),
        notifications_json: Set(serde_json::to_string(&incident.notifications)?),
        created_at: Set(to_db_time(incident.created_at)),
        updated_at: Set(to_db_time(incident.updated_at)),
    })
}

impl AlertStore {
    /// Inserts a new incident or overwrites the stored row with the same id.
    ///
    /// Updates never touch `notifications_json`; notification outcomes only
    /// change through [`append_notifications`](Self::append_notifications).
    pub async fn upsert_incident(&self, incident: &Incident) -> Result<()> {
        let mut am = to_active_model(incident)?;
        let exists = Entity::find_by_id(incident.id.as_str())
            .one(self.db())
            .await?
            .is_some();
        if exists {
            am.notifications_json = NotSet;
            am.update(self.db()).await?;
        } else {
            am.insert(self.db()).await?;
        }
        Ok(())
    }

    pub async fn get_incident(&self, id: &str) -> Result<Option<Incident>> {
        Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_incident)
            .transpose()
    }

    /// The active or acknowledged incident for a rule/VM pair, newest first.
    pub async fn find_open_incident(&self, rule_id: &str, vm_id: &str) -> Result<Option<Incident>> {
        Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .filter(Column::VmId.eq(vm_id))
            .filter(Column::Status.is_in(OPEN_STATUSES.iter().map(|s| s.to_string())))
            .order_by(Column::TriggeredAt, Order::Desc)
            .one(self.db())
            .await?
            .map(to_incident)
            .transpose()
    }

    /// Lists incidents newest first, optionally filtered by status.
    pub async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Incident>> {
        let mut q = Entity::find();
        if let Some(status) = status {
            q = q.filter(Column::Status.eq(status.to_string()));
        }
        let rows = q
            .order_by(Column::TriggeredAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_incident).collect()
    }

    /// Appends channel outcomes to an incident's notification history.
    pub async fn append_notifications(
        &self,
        incident_id: &str,
        results: &[ChannelResult],
    ) -> Result<()> {
        let model = Entity::find_by_id(incident_id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert_record",
                id: incident_id.to_string(),
            })?;
        let mut history: Vec<ChannelResult> = serde_json::from_str(&model.notifications_json)?;
        history.extend_from_slice(results);

        let mut am: alert_record::ActiveModel = model.into();
        am.notifications_json = Set(serde_json::to_string(&history)?);
        am.updated_at = Set(to_db_time(Utc::now()));
        am.update(self.db()).await?;
        Ok(())
    }

    pub async fn incident_stats(&self) -> Result<IncidentStats> {
        let rows: Vec<(String, String, Option<i64>)> = Entity::find()
            .select_only()
            .column(Column::Status)
            .column(Column::Severity)
            .column(Column::DurationSecs)
            .into_tuple()
            .all(self.db())
            .await?;

        let mut stats = IncidentStats::default();
        let mut resolved_total = 0i64;
        let mut resolved_with_duration = 0u64;
        for (status, severity, duration) in rows {
            stats.total += 1;
            match parse_column::<IncidentStatus>("status", &status)? {
                IncidentStatus::Active => stats.active += 1,
                IncidentStatus::Acknowledged => stats.acknowledged += 1,
                IncidentStatus::Resolved => {
                    stats.resolved += 1;
                    if let Some(d) = duration {
                        resolved_total += d;
                        resolved_with_duration += 1;
                    }
                }
            }
            *stats.by_severity.entry(severity).or_insert(0) += 1;
        }
        if resolved_with_duration > 0 {
            stats.mean_time_to_resolve_secs =
                Some(resolved_total as f64 / resolved_with_duration as f64);
        }
        Ok(stats)
    }
}
