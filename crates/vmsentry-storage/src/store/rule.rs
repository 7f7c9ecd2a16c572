use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use vmsentry_common::types::{
    Aggregation, AlertCondition, AlertRule, CompareOp, ConditionLogic, NotificationConfig,
    ScopeKind, Severity,
};

use crate::entities::{alert_condition, alert_rule};
use crate::error::{Result, StorageError};
use crate::store::{from_db_time, parse_column, to_db_time, AlertStore};

/// Input for creating or replacing a rule together with its conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: ScopeKind,
    #[serde(default)]
    pub scope_id: Option<String>,
    #[serde(default)]
    pub logic: ConditionLogic,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub conditions: Vec<NewCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCondition {
    pub metric: String,
    pub operator: CompareOp,
    pub threshold: f64,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default = "default_window")]
    pub duration_secs: u64,
}

fn default_scope() -> ScopeKind {
    ScopeKind::All
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> u64 {
    300
}

fn default_window() -> u64 {
    60
}

impl RuleDraft {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| StorageError::Invalid {
            entity: "alert_rule",
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        let has_target = self.scope_id.as_deref().is_some_and(|s| !s.trim().is_empty());
        if self.scope.requires_target() && !has_target {
            return Err(invalid(format!("scope '{}' requires a scope id", self.scope)));
        }
        if !self.scope.requires_target() && has_target {
            return Err(invalid("scope 'all' must not carry a scope id".to_string()));
        }
        if let Some(c) = self.conditions.iter().find(|c| !c.threshold.is_finite()) {
            return Err(invalid(format!("threshold of '{}' is not finite", c.metric)));
        }
        Ok(())
    }
}

fn to_rule(m: alert_rule::Model) -> Result<AlertRule> {
    Ok(AlertRule {
        scope: parse_column("scope", &m.scope)?,
        logic: parse_column("logic", &m.logic)?,
        severity: parse_column("severity", &m.severity)?,
        notification: serde_json::from_str(&m.notification_json)?,
        cooldown_secs: m.cooldown_secs.max(0) as u64,
        trigger_count: m.trigger_count.max(0) as u64,
        last_triggered_at: m.last_triggered_at.map(from_db_time),
        created_at: from_db_time(m.created_at),
        updated_at: from_db_time(m.updated_at),
        id: m.id,
        name: m.name,
        description: m.description,
        scope_id: m.scope_id,
        enabled: m.enabled,
    })
}

fn to_condition(m: alert_condition::Model) -> Result<AlertCondition> {
    Ok(AlertCondition {
        operator: parse_column("operator", &m.operator)?,
        aggregation: parse_column("aggregation", &m.aggregation)?,
        duration_secs: m.duration_secs.max(0) as u64,
        id: m.id,
        rule_id: m.rule_id,
        metric: m.metric,
        threshold: m.threshold,
        sort_order: m.sort_order,
    })
}

fn condition_models(
    rule_id: &str,
    conditions: &[NewCondition],
    now: DateTime<Utc>,
) -> Vec<alert_condition::ActiveModel> {
    conditions
        .iter()
        .enumerate()
        .map(|(i, c)| alert_condition::ActiveModel {
            id: Set(vmsentry_common::id::next_id()),
            rule_id: Set(rule_id.to_string()),
            metric: Set(c.metric.clone()),
            operator: Set(c.operator.to_string()),
            threshold: Set(c.threshold),
            aggregation: Set(c.aggregation.to_string()),
            duration_secs: Set(c.duration_secs as i64),
            sort_order: Set(i as i32),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        })
        .collect()
}

fn normalized_scope_id(draft: &RuleDraft) -> Option<String> {
    draft
        .scope_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl AlertStore {
    /// Creates a rule and its conditions in one transaction. Condition
    /// order follows the draft.
    pub async fn create_rule(&self, draft: &RuleDraft) -> Result<AlertRule> {
        draft.validate()?;
        let now = Utc::now();
        let id = vmsentry_common::id::next_id();
        let notification_json = serde_json::to_string(&draft.notification)?;

        let txn = self.db().begin().await?;
        let am = alert_rule::ActiveModel {
            id: Set(id.clone()),
            name: Set(draft.name.trim().to_string()),
            description: Set(draft.description.clone()),
            scope: Set(draft.scope.to_string()),
            scope_id: Set(normalized_scope_id(draft)),
            logic: Set(draft.logic.to_string()),
            severity: Set(draft.severity.to_string()),
            enabled: Set(draft.enabled),
            cooldown_secs: Set(draft.cooldown_secs as i64),
            notification_json: Set(notification_json),
            trigger_count: Set(0),
            last_triggered_at: Set(None),
            deleted_at: Set(None),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        };
        let model = am.insert(&txn).await?;
        let conditions = condition_models(&id, &draft.conditions, now);
        if !conditions.is_empty() {
            alert_condition::Entity::insert_many(conditions)
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        tracing::info!(rule_id = %id, name = %model.name, "Alert rule created");
        to_rule(model)
    }

    /// Replaces a rule's definition and conditions. Trigger statistics are
    /// preserved.
    pub async fn update_rule(&self, id: &str, draft: &RuleDraft) -> Result<AlertRule> {
        draft.validate()?;
        let existing = self.find_live_rule(id).await?;
        let now = Utc::now();
        let notification_json = serde_json::to_string(&draft.notification)?;

        let txn = self.db().begin().await?;
        let mut am: alert_rule::ActiveModel = existing.into();
        am.name = Set(draft.name.trim().to_string());
        am.description = Set(draft.description.clone());
        am.scope = Set(draft.scope.to_string());
        am.scope_id = Set(normalized_scope_id(draft));
        am.logic = Set(draft.logic.to_string());
        am.severity = Set(draft.severity.to_string());
        am.enabled = Set(draft.enabled);
        am.cooldown_secs = Set(draft.cooldown_secs as i64);
        am.notification_json = Set(notification_json);
        am.updated_at = Set(to_db_time(now));
        let model = am.update(&txn).await?;

        alert_condition::Entity::delete_many()
            .filter(alert_condition::Column::RuleId.eq(id))
            .exec(&txn)
            .await?;
        let conditions = condition_models(id, &draft.conditions, now);
        if !conditions.is_empty() {
            alert_condition::Entity::insert_many(conditions)
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        tracing::info!(rule_id = %id, "Alert rule updated");
        to_rule(model)
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<AlertRule> {
        let existing = self.find_live_rule(id).await?;
        let mut am: alert_rule::ActiveModel = existing.into();
        am.enabled = Set(enabled);
        am.updated_at = Set(to_db_time(Utc::now()));
        let model = am.update(self.db()).await?;
        to_rule(model)
    }

    /// Soft-deletes a rule. Incidents keep their denormalized rule name.
    pub async fn delete_rule(&self, id: &str) -> Result<bool> {
        let Some(model) = alert_rule::Entity::find_by_id(id)
            .filter(alert_rule::Column::DeletedAt.is_null())
            .one(self.db())
            .await?
        else {
            return Ok(false);
        };
        let now = to_db_time(Utc::now());
        let mut am: alert_rule::ActiveModel = model.into();
        am.enabled = Set(false);
        am.deleted_at = Set(Some(now));
        am.updated_at = Set(now);
        am.update(self.db()).await?;
        tracing::info!(rule_id = %id, "Alert rule deleted");
        Ok(true)
    }

    pub async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        alert_rule::Entity::find_by_id(id)
            .filter(alert_rule::Column::DeletedAt.is_null())
            .one(self.db())
            .await?
            .map(to_rule)
            .transpose()
    }

    pub async fn find_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        alert_rule::Entity::find()
            .filter(alert_rule::Column::Name.eq(name.trim()))
            .filter(alert_rule::Column::DeletedAt.is_null())
            .one(self.db())
            .await?
            .map(to_rule)
            .transpose()
    }

    /// Lists live rules, oldest first.
    pub async fn list_rules(&self, enabled: Option<bool>) -> Result<Vec<AlertRule>> {
        let mut q = alert_rule::Entity::find().filter(alert_rule::Column::DeletedAt.is_null());
        if let Some(en) = enabled {
            q = q.filter(alert_rule::Column::Enabled.eq(en));
        }
        let rows = q
            .order_by(alert_rule::Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_rule).collect()
    }

    /// Conditions of a rule ordered by `sort_order`.
    pub async fn rule_conditions(&self, rule_id: &str) -> Result<Vec<AlertCondition>> {
        let rows = alert_condition::Entity::find()
            .filter(alert_condition::Column::RuleId.eq(rule_id))
            .order_by(alert_condition::Column::SortOrder, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_condition).collect()
    }

    /// Atomically increments the trigger counter and stamps the last
    /// trigger time.
    pub async fn record_rule_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()> {
        let res = alert_rule::Entity::update_many()
            .col_expr(
                alert_rule::Column::TriggerCount,
                Expr::col(alert_rule::Column::TriggerCount).add(1),
            )
            .col_expr(
                alert_rule::Column::LastTriggeredAt,
                Expr::value(Some(to_db_time(at))),
            )
            .filter(alert_rule::Column::Id.eq(rule_id))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Err(StorageError::NotFound {
                entity: "alert_rule",
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_live_rule(&self, id: &str) -> Result<alert_rule::Model> {
        alert_rule::Entity::find_by_id(id)
            .filter(alert_rule::Column::DeletedAt.is_null())
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert_rule",
                id: id.to_string(),
            })
    }
}
