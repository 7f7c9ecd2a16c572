use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    scope TEXT NOT NULL,
    scope_id TEXT,
    logic TEXT NOT NULL DEFAULT 'and',
    severity TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    cooldown_secs INTEGER NOT NULL DEFAULT 300,
    notification_json TEXT NOT NULL DEFAULT '{}',
    trigger_count INTEGER NOT NULL DEFAULT 0,
    last_triggered_at TEXT,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_enabled ON alert_rules(enabled, deleted_at);
CREATE INDEX IF NOT EXISTS idx_alert_rules_name ON alert_rules(name);

CREATE TABLE IF NOT EXISTS alert_conditions (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    operator TEXT NOT NULL,
    threshold REAL NOT NULL,
    aggregation TEXT NOT NULL DEFAULT 'last',
    duration_secs INTEGER NOT NULL DEFAULT 60,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_conditions_rule ON alert_conditions(rule_id, sort_order);

CREATE TABLE IF NOT EXISTS alert_records (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    rule_name TEXT NOT NULL,
    vm_id TEXT NOT NULL,
    vm_name TEXT NOT NULL,
    cluster_id TEXT,
    metric TEXT NOT NULL,
    severity TEXT NOT NULL,
    trigger_value REAL NOT NULL,
    threshold REAL NOT NULL,
    condition_desc TEXT NOT NULL,
    status TEXT NOT NULL,
    triggered_at TEXT NOT NULL,
    acknowledged_at TEXT,
    acknowledged_by TEXT,
    acknowledge_note TEXT,
    resolved_at TEXT,
    resolved_by TEXT,
    resolution TEXT,
    duration_secs INTEGER,
    snapshot_json TEXT NOT NULL DEFAULT '{}',
    notifications_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_records_pair ON alert_records(rule_id, vm_id, status);
CREATE INDEX IF NOT EXISTS idx_alert_records_status ON alert_records(status, triggered_at DESC);

CREATE TABLE IF NOT EXISTS vms (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    ip TEXT,
    os_type TEXT,
    status TEXT NOT NULL,
    host_id TEXT,
    host_name TEXT,
    cluster_id TEXT,
    cluster_name TEXT,
    datacenter_id TEXT,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vms_cluster ON vms(cluster_id);
CREATE INDEX IF NOT EXISTS idx_vms_host ON vms(host_id);
CREATE INDEX IF NOT EXISTS idx_vms_datacenter ON vms(datacenter_id);

CREATE TABLE IF NOT EXISTS vm_group_members (
    id TEXT PRIMARY KEY NOT NULL,
    group_id TEXT NOT NULL,
    vm_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(group_id, vm_id)
);

CREATE TABLE IF NOT EXISTS metric_samples (
    id TEXT PRIMARY KEY NOT NULL,
    vm_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    value REAL NOT NULL,
    timestamp TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metric_samples_lookup ON metric_samples(vm_id, metric, timestamp);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS metric_samples;
DROP TABLE IF EXISTS vm_group_members;
DROP TABLE IF EXISTS vms;
DROP TABLE IF EXISTS alert_records;
DROP TABLE IF EXISTS alert_conditions;
DROP TABLE IF EXISTS alert_rules;
";
