use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub vm_id: String,
    pub vm_name: String,
    pub cluster_id: Option<String>,
    pub metric: String,
    pub severity: String,
    pub trigger_value: f64,
    pub threshold: f64,
    pub condition_desc: String,
    pub status: String,
    pub triggered_at: DateTimeWithTimeZone,
    pub acknowledged_at: Option<DateTimeWithTimeZone>,
    pub acknowledged_by: Option<String>,
    pub acknowledge_note: Option<String>,
    pub resolved_at: Option<DateTimeWithTimeZone>,
    pub resolved_by: Option<String>,
    pub resolution: Option<String>,
    pub duration_secs: Option<i64>,
    pub snapshot_json: String,
    pub notifications_json: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
