use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vmsentry_common::types::{AlertCondition, ConditionLogic, EntityRef};

use crate::MetricAccessor;

/// The metric observation that made a condition true.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub condition_desc: String,
    pub sampled_at: DateTime<Utc>,
}

/// Outcome of evaluating one rule against one VM.
///
/// `sample` carries the first true condition in `sort_order`, present
/// whenever at least one condition held.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub triggered: bool,
    pub sample: Option<MetricSample>,
}

/// Evaluates a rule's conditions against live metrics.
pub struct ConditionEvaluator {
    metrics: Arc<dyn MetricAccessor>,
    fetch_timeout: Duration,
}

impl ConditionEvaluator {
    pub fn new(metrics: Arc<dyn MetricAccessor>, fetch_timeout: Duration) -> Self {
        Self {
            metrics,
            fetch_timeout,
        }
    }

    /// Evaluates every condition in `sort_order` and combines the results
    /// with `logic`. Missing data, fetch errors and timeouts make the
    /// affected condition false; they never fail the evaluation.
    pub async fn evaluate(
        &self,
        logic: ConditionLogic,
        conditions: &[AlertCondition],
        entity: &EntityRef,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut ordered: Vec<&AlertCondition> = conditions.iter().collect();
        ordered.sort_by_key(|c| c.sort_order);

        let mut results = Vec::with_capacity(ordered.len());
        let mut first_match = None;
        for condition in ordered {
            let matched = match self.fetch(entity, condition).await {
                Some(value) => {
                    let hit = condition.operator.check(value, condition.threshold);
                    if hit && first_match.is_none() {
                        first_match = Some(MetricSample {
                            metric: condition.metric.clone(),
                            value,
                            threshold: condition.threshold,
                            condition_desc: condition.describe(value),
                            sampled_at: now,
                        });
                    }
                    hit
                }
                None => false,
            };
            results.push(matched);
        }

        Evaluation {
            triggered: combine(logic, &results),
            sample: first_match,
        }
    }

    async fn fetch(&self, entity: &EntityRef, condition: &AlertCondition) -> Option<f64> {
        let lookup = self.metrics.get_value(
            &entity.id,
            &condition.metric,
            condition.aggregation,
            condition.duration_secs,
        );
        match tokio::time::timeout(self.fetch_timeout, lookup).await {
            Ok(Ok(Some(value))) if value.is_finite() => Some(value),
            Ok(Ok(_)) => {
                tracing::debug!(entity_id = %entity.id, metric = %condition.metric, "Metric unavailable");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(entity_id = %entity.id, metric = %condition.metric, error = %e, "Metric lookup failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    entity_id = %entity.id,
                    metric = %condition.metric,
                    timeout_secs = self.fetch_timeout.as_secs(),
                    "Metric lookup timed out"
                );
                None
            }
        }
    }
}

/// Combines per-condition results. An empty list is never true.
pub fn combine(logic: ConditionLogic, results: &[bool]) -> bool {
    match logic {
        ConditionLogic::And => !results.is_empty() && results.iter().all(|r| *r),
        ConditionLogic::Or => results.iter().any(|r| *r),
    }
}
