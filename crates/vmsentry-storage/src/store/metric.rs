use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};
use vmsentry_common::types::Aggregation;

use crate::entities::metric_sample::{self, Column, Entity};
use crate::error::Result;
use crate::store::{to_db_time, AlertStore};

impl AlertStore {
    pub async fn insert_sample(
        &self,
        vm_id: &str,
        metric: &str,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let am = metric_sample::ActiveModel {
            id: Set(vmsentry_common::id::next_id()),
            vm_id: Set(vm_id.to_string()),
            metric: Set(metric.to_string()),
            value: Set(value),
            timestamp: Set(to_db_time(at)),
            created_at: Set(to_db_time(Utc::now())),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    /// Aggregates the samples of `metric` for a VM over `[now - window, now]`.
    ///
    /// A zero window reads the most recent sample at or before `now`.
    /// Returns `None` when the window holds no samples.
    pub async fn aggregate_metric(
        &self,
        vm_id: &str,
        metric: &str,
        aggregation: Aggregation,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let base = Entity::find()
            .select_only()
            .column(Column::Value)
            .filter(Column::VmId.eq(vm_id))
            .filter(Column::Metric.eq(metric))
            .filter(Column::Timestamp.lte(to_db_time(now)));

        if window_secs == 0 {
            let latest: Option<f64> = base
                .order_by(Column::Timestamp, Order::Desc)
                .into_tuple()
                .one(self.db())
                .await?;
            return Ok(latest);
        }

        let since = i64::try_from(window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let values: Vec<f64> = base
            .filter(Column::Timestamp.gte(to_db_time(since)))
            .order_by(Column::Timestamp, Order::Asc)
            .into_tuple()
            .all(self.db())
            .await?;
        Ok(aggregation.apply(&values))
    }

    /// Deletes samples older than `cutoff`. Returns the number removed.
    pub async fn prune_samples(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::Timestamp.lt(to_db_time(cutoff)))
            .exec(self.db())
            .await?;
        if res.rows_affected > 0 {
            tracing::info!(removed = res.rows_affected, "Pruned metric samples");
        }
        Ok(res.rows_affected)
    }
}
