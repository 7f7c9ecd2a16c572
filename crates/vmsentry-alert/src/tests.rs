use crate::cache::RuleCache;
use crate::engine::{AlertEngine, EngineOptions};
use crate::error::AlertError;
use crate::evaluator::{combine, ConditionEvaluator};
use crate::lifecycle::{LifecycleManager, TriggerHistory, AUTO_RESOLUTION, SYSTEM_OPERATOR};
use crate::memory::{InMemoryStore, ManualClock, StaticMetrics};
use crate::scope::ScopeResolver;
use crate::{IncidentNotifier, MetricAccessor, RuleRepository};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use vmsentry_common::types::{
    Aggregation, AlertCondition, AlertRule, ChannelResult, CompareOp, ConditionLogic, EntityRef,
    Incident, IncidentStatus, NotificationConfig, ScopeKind, Severity,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn make_rule(id: &str, scope: ScopeKind, scope_id: Option<&str>, cooldown_secs: u64) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        name: format!("rule {id}"),
        description: None,
        scope,
        scope_id: scope_id.map(str::to_string),
        logic: ConditionLogic::And,
        severity: Severity::High,
        enabled: true,
        cooldown_secs,
        notification: NotificationConfig::default(),
        trigger_count: 0,
        last_triggered_at: None,
        created_at: t0(),
        updated_at: t0(),
    }
}

fn make_cond(rule_id: &str, metric: &str, op: CompareOp, threshold: f64, sort_order: i32) -> AlertCondition {
    AlertCondition {
        id: format!("{rule_id}-{metric}-{sort_order}"),
        rule_id: rule_id.to_string(),
        metric: metric.to_string(),
        operator: op,
        threshold,
        aggregation: Aggregation::Avg,
        duration_secs: 60,
        sort_order,
    }
}

fn make_vm(id: &str, cluster: Option<&str>) -> EntityRef {
    EntityRef {
        id: id.to_string(),
        name: format!("{id}-name"),
        ip: Some("10.0.0.5".into()),
        os_type: Some("linux".into()),
        status: "running".into(),
        host_id: Some("host-1".into()),
        host_name: Some("esx-01".into()),
        cluster_id: cluster.map(str::to_string),
        cluster_name: cluster.map(|c| format!("{c}-name")),
        datacenter_id: Some("dc-1".into()),
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<(Incident, NotificationConfig)>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl IncidentNotifier for RecordingNotifier {
    fn notify(&self, incident: Incident, config: NotificationConfig) {
        self.seen.lock().unwrap().push((incident, config));
    }
}

struct Fixture {
    store: Arc<InMemoryStore>,
    metrics: Arc<StaticMetrics>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    engine: Arc<AlertEngine>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let metrics = Arc::new(StaticMetrics::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = AlertEngine::new(store.clone(), store.clone(), metrics.clone(), EngineOptions::default())
        .with_clock(clock.clone())
        .with_notifier(notifier.clone());
    Fixture {
        store,
        metrics,
        clock,
        notifier,
        engine: Arc::new(engine),
    }
}

/// vm1 with a single `cpu_usage > 80` rule scoped to it.
fn cpu_fixture(cooldown_secs: u64) -> Fixture {
    let fx = fixture();
    fx.store.insert_entity(make_vm("vm1", Some("c1")));
    fx.store.insert_rule(
        make_rule("r1", ScopeKind::Entity, Some("vm1"), cooldown_secs),
        vec![make_cond("r1", "cpu_usage", CompareOp::GreaterThan, 80.0, 0)],
    );
    fx
}

fn open_count(store: &InMemoryStore, rule_id: &str, entity_id: &str) -> usize {
    store
        .incidents_for(rule_id, entity_id)
        .iter()
        .filter(|i| i.status.is_open())
        .count()
}

#[tokio::test]
async fn threshold_breach_opens_incident() {
    let fx = cpu_fixture(300);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();

    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.opened, 1);
    assert_eq!(summary.errors, 0);

    let incidents = fx.store.incidents();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.status, IncidentStatus::Active);
    assert_eq!(incident.metric, "cpu_usage");
    assert_eq!(incident.trigger_value, 85.0);
    assert_eq!(incident.threshold, 80.0);
    assert_eq!(incident.severity, Severity::High);
    assert_eq!(incident.triggered_at, t0());
    assert_eq!(incident.cluster_id.as_deref(), Some("c1"));
    assert!(incident.condition_desc.contains("cpu_usage"));
    assert!(incident.condition_desc.contains("85.0000"));
    assert_eq!(incident.snapshot["vm"]["name"], "vm1-name");
    assert_eq!(incident.snapshot["vm"]["clusterName"], "c1-name");

    assert_eq!(fx.notifier.count(), 1);
    let rule = fx.store.rule("r1").unwrap();
    assert_eq!(rule.trigger_count, 1);
    assert_eq!(rule.last_triggered_at, Some(t0()));
}

#[tokio::test]
async fn below_threshold_does_nothing() {
    let fx = cpu_fixture(300);
    fx.metrics.set("vm1", "cpu_usage", 79.9);
    fx.engine.reload_rules().await.unwrap();

    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.opened, 0);
    assert!(fx.store.incidents().is_empty());
    assert_eq!(fx.notifier.count(), 0);
}

#[tokio::test]
async fn still_breaching_is_suppressed() {
    let fx = cpu_fixture(0);
    fx.metrics.set("vm1", "cpu_usage", 95.0);
    fx.engine.reload_rules().await.unwrap();

    fx.engine.evaluate_once().await;
    fx.clock.advance(Duration::seconds(60));
    let summary = fx.engine.evaluate_once().await;

    assert_eq!(summary.suppressed, 1);
    assert_eq!(summary.opened, 0);
    assert_eq!(fx.store.incidents().len(), 1);
    assert_eq!(fx.notifier.count(), 1);
}

#[tokio::test]
async fn recovery_auto_resolves_with_duration() {
    let fx = cpu_fixture(300);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;

    fx.clock.advance(Duration::seconds(120));
    fx.metrics.set("vm1", "cpu_usage", 50.0);
    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.resolved, 1);

    let incident = &fx.store.incidents()[0];
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert_eq!(incident.resolved_by.as_deref(), Some(SYSTEM_OPERATOR));
    assert_eq!(incident.resolution.as_deref(), Some(AUTO_RESOLUTION));
    assert_eq!(incident.resolved_at, Some(t0() + Duration::seconds(120)));
    assert_eq!(incident.duration_secs, Some(120));
    // Recovery is not a notification event.
    assert_eq!(fx.notifier.count(), 1);
}

#[tokio::test]
async fn cooldown_blocks_reopen_after_resolve() {
    let fx = cpu_fixture(300);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;

    // Resolves at T.
    let resolved_at = t0() + Duration::seconds(10);
    fx.clock.set(resolved_at);
    fx.metrics.set("vm1", "cpu_usage", 10.0);
    assert_eq!(fx.engine.evaluate_once().await.resolved, 1);

    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.clock.set(resolved_at + Duration::seconds(100));
    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.cooldown_blocked, 1);
    assert_eq!(fx.store.incidents().len(), 1);

    fx.clock.set(resolved_at + Duration::seconds(301));
    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.opened, 1);
    assert_eq!(fx.store.incidents().len(), 2);
    assert_eq!(open_count(&fx.store, "r1", "vm1"), 1);
}

#[tokio::test]
async fn operator_resolve_restarts_cooldown() {
    let fx = cpu_fixture(300);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;
    let id = fx.store.incidents()[0].id.clone();

    fx.clock.advance(Duration::seconds(400));
    let resolved = fx.engine.resolve(&id, "alice", Some("rebooted".into())).await.unwrap();
    assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
    assert_eq!(resolved.duration_secs, Some(400));

    fx.clock.advance(Duration::seconds(60));
    assert_eq!(fx.engine.evaluate_once().await.cooldown_blocked, 1);
    fx.clock.advance(Duration::seconds(240));
    assert_eq!(fx.engine.evaluate_once().await.opened, 1);
}

#[tokio::test]
async fn cooldown_gate_does_not_block_other_vms_in_same_pass() {
    let fx = fixture();
    fx.store.insert_entity(make_vm("vm1", Some("c1")));
    fx.store.insert_entity(make_vm("vm2", Some("c1")));
    fx.store.insert_rule(
        make_rule("r1", ScopeKind::Cluster, Some("c1"), 300),
        vec![make_cond("r1", "cpu_usage", CompareOp::GreaterEqual, 90.0, 0)],
    );
    fx.metrics.set("vm1", "cpu_usage", 90.0);
    fx.metrics.set("vm2", "cpu_usage", 99.0);
    fx.engine.reload_rules().await.unwrap();

    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.entities, 2);
    assert_eq!(summary.opened, 2);
    assert_eq!(fx.notifier.count(), 2);
}

#[tokio::test]
async fn missing_metric_never_triggers() {
    let fx = cpu_fixture(0);
    fx.engine.reload_rules().await.unwrap();

    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.opened, 0);
    assert_eq!(summary.errors, 0);
    assert!(fx.store.incidents().is_empty());
}

#[tokio::test]
async fn missing_metric_resolves_open_incident() {
    let fx = cpu_fixture(0);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;

    fx.metrics.clear("vm1", "cpu_usage");
    fx.clock.advance(Duration::seconds(30));
    assert_eq!(fx.engine.evaluate_once().await.resolved, 1);
}

fn evaluator(metrics: Arc<StaticMetrics>) -> ConditionEvaluator {
    ConditionEvaluator::new(metrics, std::time::Duration::from_secs(1))
}

#[test]
fn combine_truth_table() {
    use ConditionLogic::{And, Or};
    assert!(combine(And, &[true, true]));
    assert!(!combine(And, &[true, false]));
    assert!(!combine(And, &[false, false]));
    assert!(combine(Or, &[true, false]));
    assert!(combine(Or, &[false, true]));
    assert!(!combine(Or, &[false, false]));
    assert!(!combine(And, &[]));
    assert!(!combine(Or, &[]));
}

#[tokio::test]
async fn and_or_combination_over_metrics() {
    let metrics = Arc::new(StaticMetrics::new());
    metrics.set("vm1", "cpu_usage", 95.0);
    metrics.set("vm1", "mem_usage", 40.0);
    let conds = vec![
        make_cond("r", "cpu_usage", CompareOp::GreaterThan, 90.0, 0),
        make_cond("r", "mem_usage", CompareOp::GreaterThan, 90.0, 1),
    ];
    let eval = evaluator(metrics.clone());
    let vm = make_vm("vm1", None);

    let and = eval.evaluate(ConditionLogic::And, &conds, &vm, t0()).await;
    assert!(!and.triggered);

    let or = eval.evaluate(ConditionLogic::Or, &conds, &vm, t0()).await;
    assert!(or.triggered);
    assert_eq!(or.sample.unwrap().metric, "cpu_usage");

    let none = eval.evaluate(ConditionLogic::Or, &[], &vm, t0()).await;
    assert!(!none.triggered);
    assert!(none.sample.is_none());
    assert_eq!(metrics.calls(), 4);
}

#[tokio::test]
async fn metric_error_counts_as_false() {
    let metrics = Arc::new(StaticMetrics::new());
    metrics.fail("vm1", "disk_usage");
    metrics.set("vm1", "cpu_usage", 95.0);
    let conds = vec![
        make_cond("r", "disk_usage", CompareOp::GreaterThan, 10.0, 0),
        make_cond("r", "cpu_usage", CompareOp::GreaterThan, 90.0, 1),
    ];
    let eval = evaluator(metrics);
    let vm = make_vm("vm1", None);

    assert!(!eval.evaluate(ConditionLogic::And, &conds, &vm, t0()).await.triggered);
    let or = eval.evaluate(ConditionLogic::Or, &conds, &vm, t0()).await;
    assert!(or.triggered);
    assert_eq!(or.sample.unwrap().metric, "cpu_usage");
}

#[tokio::test]
async fn sample_follows_sort_order_not_insertion_order() {
    let metrics = Arc::new(StaticMetrics::new());
    metrics.set("vm1", "cpu_usage", 95.0);
    metrics.set("vm1", "mem_usage", 97.0);
    let conds = vec![
        make_cond("r", "mem_usage", CompareOp::GreaterThan, 90.0, 2),
        make_cond("r", "cpu_usage", CompareOp::GreaterThan, 90.0, 1),
    ];
    let eval = evaluator(metrics);
    let vm = make_vm("vm1", None);

    for logic in [ConditionLogic::And, ConditionLogic::Or] {
        for _ in 0..3 {
            let result = eval.evaluate(logic, &conds, &vm, t0()).await;
            assert!(result.triggered);
            let sample = result.sample.unwrap();
            assert_eq!(sample.metric, "cpu_usage");
            assert_eq!(sample.value, 95.0);
        }
    }
}

/// Metric source whose lookups never complete.
struct StalledMetrics;

#[async_trait]
impl MetricAccessor for StalledMetrics {
    async fn get_value(
        &self,
        _entity_id: &str,
        _metric: &str,
        _aggregation: Aggregation,
        _window_secs: u64,
    ) -> anyhow::Result<Option<f64>> {
        std::future::pending().await
    }
}

/// Answers from a [`StaticMetrics`] after a fixed delay.
struct DelayedMetrics {
    inner: Arc<StaticMetrics>,
    delay: std::time::Duration,
}

#[async_trait]
impl MetricAccessor for DelayedMetrics {
    async fn get_value(
        &self,
        entity_id: &str,
        metric: &str,
        aggregation: Aggregation,
        window_secs: u64,
    ) -> anyhow::Result<Option<f64>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_value(entity_id, metric, aggregation, window_secs).await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_metric_lookup_times_out_as_false() {
    let conds = vec![make_cond("r", "cpu_usage", CompareOp::GreaterThan, 80.0, 0)];
    let eval = ConditionEvaluator::new(Arc::new(StalledMetrics), std::time::Duration::from_secs(5));
    let vm = make_vm("vm1", None);

    let started = tokio::time::Instant::now();
    let result = eval.evaluate(ConditionLogic::Or, &conds, &vm, t0()).await;
    assert!(!result.triggered);
    assert!(result.sample.is_none());
    assert!(started.elapsed() >= std::time::Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn stalled_metric_lookup_does_not_block_the_pass() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_entity(make_vm("vm1", Some("c1")));
    store.insert_entity(make_vm("vm2", Some("c1")));
    store.insert_rule(
        make_rule("r1", ScopeKind::Cluster, Some("c1"), 0),
        vec![make_cond("r1", "cpu_usage", CompareOp::GreaterThan, 80.0, 0)],
    );
    let engine = AlertEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(StalledMetrics),
        EngineOptions::default(),
    )
    .with_clock(Arc::new(ManualClock::new(t0())));
    engine.reload_rules().await.unwrap();

    let summary = engine.evaluate_once().await;
    assert_eq!(summary.opened, 0);
    assert_eq!(summary.errors, 0);
    assert!(store.incidents().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_metric_timeout_is_raised_to_one_second() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_entity(make_vm("vm1", Some("c1")));
    store.insert_rule(
        make_rule("r1", ScopeKind::Entity, Some("vm1"), 0),
        vec![make_cond("r1", "cpu_usage", CompareOp::GreaterThan, 80.0, 0)],
    );
    let metrics = Arc::new(StaticMetrics::new());
    metrics.set("vm1", "cpu_usage", 95.0);
    let delayed = Arc::new(DelayedMetrics {
        inner: metrics,
        delay: std::time::Duration::from_millis(200),
    });
    let options = EngineOptions {
        metric_timeout: std::time::Duration::ZERO,
        ..EngineOptions::default()
    };
    let engine = AlertEngine::new(store.clone(), store.clone(), delayed, options)
        .with_clock(Arc::new(ManualClock::new(t0())));
    engine.reload_rules().await.unwrap();

    assert_eq!(engine.evaluate_once().await.opened, 1);
}

#[tokio::test]
async fn scope_resolution() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_entity(make_vm("vm1", Some("c1")));
    store.insert_entity(make_vm("vm2", Some("c2")));
    let mut lost = make_vm("vm3", Some("c1"));
    lost.status = "unknown".into();
    store.insert_entity(lost);
    store.add_group_member("g1", "vm2");
    let resolver = ScopeResolver::new(store);

    let all = resolver.resolve(ScopeKind::All, None).await.unwrap();
    let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["vm1", "vm2"]);

    let group = resolver.resolve(ScopeKind::Group, Some("g1")).await.unwrap();
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].id, "vm2");

    let cluster = resolver.resolve(ScopeKind::Cluster, Some("c1")).await.unwrap();
    assert_eq!(cluster.len(), 2);

    let empty = resolver.resolve(ScopeKind::Host, Some("no-such-host")).await.unwrap();
    assert!(empty.is_empty());

    let vm = resolver.resolve(ScopeKind::Entity, Some("vm1")).await.unwrap();
    assert_eq!(vm[0].name, "vm1-name");
}

#[tokio::test]
async fn scope_errors() {
    let store = Arc::new(InMemoryStore::new());
    let resolver = ScopeResolver::new(store);

    let err = resolver.resolve(ScopeKind::Group, None).await.unwrap_err();
    assert!(matches!(err, AlertError::MissingScopeId(ScopeKind::Group)));

    let err = resolver.resolve(ScopeKind::Datacenter, Some("  ")).await.unwrap_err();
    assert!(matches!(err, AlertError::MissingScopeId(ScopeKind::Datacenter)));

    let err = resolver.resolve(ScopeKind::Entity, Some("ghost")).await.unwrap_err();
    assert!(matches!(err, AlertError::EntityNotFound(ref id) if id == "ghost"));
}

#[tokio::test]
async fn failing_rule_does_not_abort_pass() {
    let fx = cpu_fixture(0);
    // Deleted VM: resolving this rule fails every pass.
    fx.store.insert_rule(
        make_rule("r0", ScopeKind::Entity, Some("vm-gone"), 0),
        vec![make_cond("r0", "cpu_usage", CompareOp::GreaterThan, 1.0, 0)],
    );
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();

    let summary = fx.engine.evaluate_once().await;
    assert_eq!(summary.rules, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.opened, 1);
}

#[tokio::test]
async fn failed_reload_keeps_previous_snapshot() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_rule(
        make_rule("r1", ScopeKind::All, None, 0),
        vec![make_cond("r1", "cpu_usage", CompareOp::GreaterThan, 80.0, 0)],
    );
    let cache = RuleCache::new(store.clone());
    assert_eq!(cache.reload().await.unwrap(), 1);
    let loaded_at = cache.loaded_at();

    store.remove_rule("r1");
    store.set_unavailable(true);
    assert!(matches!(cache.reload().await, Err(AlertError::Repository(_))));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.snapshot()[0].rule.id, "r1");
    assert_eq!(cache.loaded_at(), loaded_at);

    store.set_unavailable(false);
    assert_eq!(cache.reload().await.unwrap(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn reload_skips_misconfigured_and_disabled_rules() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_rule(make_rule("bad", ScopeKind::Cluster, None, 0), vec![]);
    let mut disabled = make_rule("off", ScopeKind::All, None, 0);
    disabled.enabled = false;
    store.insert_rule(disabled, vec![]);
    store.insert_rule(
        make_rule("ok", ScopeKind::All, None, 0),
        vec![
            make_cond("ok", "b", CompareOp::LessThan, 1.0, 5),
            make_cond("ok", "a", CompareOp::LessThan, 1.0, 1),
        ],
    );
    let cache = RuleCache::new(store);

    assert_eq!(cache.reload().await.unwrap(), 1);
    let snapshot = cache.snapshot();
    assert_eq!(snapshot[0].rule.id, "ok");
    let order: Vec<_> = snapshot[0].conditions.iter().map(|c| c.metric.as_str()).collect();
    assert_eq!(order, vec!["a", "b"]);
}

#[tokio::test]
async fn acknowledge_and_resolve_transitions() {
    let fx = cpu_fixture(0);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;
    let id = fx.store.incidents()[0].id.clone();

    let acked = fx.engine.acknowledge(&id, "bob", Some("looking".into())).await.unwrap();
    assert_eq!(acked.status, IncidentStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("bob"));

    let err = fx.engine.acknowledge(&id, "bob", None).await.unwrap_err();
    assert!(matches!(
        err,
        AlertError::InvalidTransition { from: IncidentStatus::Acknowledged, .. }
    ));

    // Acknowledged still counts as open: no duplicate while breaching.
    fx.clock.advance(Duration::seconds(60));
    assert_eq!(fx.engine.evaluate_once().await.suppressed, 1);

    let resolved = fx.engine.resolve(&id, "bob", Some("fixed".into())).await.unwrap();
    assert_eq!(resolved.status, IncidentStatus::Resolved);
    assert_eq!(resolved.resolution.as_deref(), Some("fixed"));

    let err = fx.engine.resolve(&id, "bob", None).await.unwrap_err();
    assert!(matches!(err, AlertError::InvalidTransition { from: IncidentStatus::Resolved, .. }));

    let err = fx.engine.acknowledge("missing", "bob", None).await.unwrap_err();
    assert!(matches!(err, AlertError::IncidentNotFound(_)));
}

/// Delegates to an [`InMemoryStore`] but takes a while to load incidents.
struct SlowIncidentLoads {
    inner: Arc<InMemoryStore>,
}

#[async_trait]
impl RuleRepository for SlowIncidentLoads {
    async fn list_enabled_rules(&self) -> anyhow::Result<Vec<AlertRule>> {
        self.inner.list_enabled_rules().await
    }

    async fn list_conditions(&self, rule_id: &str) -> anyhow::Result<Vec<AlertCondition>> {
        self.inner.list_conditions(rule_id).await
    }

    async fn upsert_incident(&self, incident: &Incident) -> anyhow::Result<()> {
        self.inner.upsert_incident(incident).await
    }

    async fn find_open_incident(
        &self,
        rule_id: &str,
        entity_id: &str,
    ) -> anyhow::Result<Option<Incident>> {
        self.inner.find_open_incident(rule_id, entity_id).await
    }

    async fn get_incident(&self, incident_id: &str) -> anyhow::Result<Option<Incident>> {
        let incident = self.inner.get_incident(incident_id).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        incident
    }

    async fn increment_trigger_count(&self, rule_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.inner.increment_trigger_count(rule_id, at).await
    }

    async fn record_notifications(
        &self,
        incident_id: &str,
        results: &[ChannelResult],
    ) -> anyhow::Result<()> {
        self.inner.record_notifications(incident_id, results).await
    }
}

#[tokio::test]
async fn acknowledge_keeps_notifications_recorded_meanwhile() {
    let fx = cpu_fixture(0);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;
    let id = fx.store.incidents()[0].id.clone();

    let lifecycle = Arc::new(LifecycleManager::new(Arc::new(SlowIncidentLoads {
        inner: fx.store.clone(),
    })));
    let ack = tokio::spawn({
        let lifecycle = lifecycle.clone();
        let id = id.clone();
        async move { lifecycle.acknowledge(&id, "bob", None, t0()).await }
    });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    fx.store
        .record_notifications(&id, &[ChannelResult::success("inApp", None)])
        .await
        .unwrap();

    let acked = ack.await.unwrap().unwrap();
    assert_eq!(acked.status, IncidentStatus::Acknowledged);

    let stored = fx.store.get_incident(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, IncidentStatus::Acknowledged);
    assert_eq!(stored.notifications.len(), 1);
    assert_eq!(stored.notifications[0].method, "inApp");
}

#[tokio::test]
async fn resolve_keeps_notifications_recorded_meanwhile() {
    let fx = cpu_fixture(0);
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;
    let id = fx.store.incidents()[0].id.clone();

    let lifecycle = Arc::new(LifecycleManager::new(Arc::new(SlowIncidentLoads {
        inner: fx.store.clone(),
    })));
    let resolve = tokio::spawn({
        let lifecycle = lifecycle.clone();
        let id = id.clone();
        async move { lifecycle.resolve(&id, "bob", None, t0()).await }
    });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    fx.store
        .record_notifications(&id, &[ChannelResult::success("inApp", None)])
        .await
        .unwrap();

    resolve.await.unwrap().unwrap();
    let stored = fx.store.get_incident(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, IncidentStatus::Resolved);
    assert_eq!(stored.notifications.len(), 1);
}

#[tokio::test]
async fn batch_acknowledge_reports_each_id() {
    let fx = cpu_fixture(0);
    fx.store.insert_entity(make_vm("vm2", Some("c1")));
    fx.store.insert_rule(
        make_rule("r2", ScopeKind::Entity, Some("vm2"), 0),
        vec![make_cond("r2", "cpu_usage", CompareOp::GreaterThan, 80.0, 0)],
    );
    fx.metrics.set("vm1", "cpu_usage", 85.0);
    fx.metrics.set("vm2", "cpu_usage", 85.0);
    fx.engine.reload_rules().await.unwrap();
    fx.engine.evaluate_once().await;

    let mut ids: Vec<String> = fx.store.incidents().into_iter().map(|i| i.id).collect();
    ids.push("nope".into());
    let outcomes = fx.engine.batch_acknowledge(&ids, "ops", None).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].1.is_ok());
    assert!(outcomes[1].1.is_ok());
    assert!(matches!(outcomes[2].1, Err(AlertError::IncidentNotFound(_))));
}

#[test]
fn trigger_history_cooldown() {
    let history = TriggerHistory::new();
    assert!(history.cooldown_expired("r1", 300, t0()));

    history.stamp("r1", t0());
    assert!(!history.cooldown_expired("r1", 300, t0() + Duration::seconds(299)));
    assert!(history.cooldown_expired("r1", 300, t0() + Duration::seconds(300)));
    assert!(history.cooldown_expired("r1", 0, t0()));

    // Anchors never move backwards.
    history.stamp("r1", t0() - Duration::seconds(1000));
    assert_eq!(history.last_triggered("r1"), Some(t0()));

    history.clear();
    assert!(history.last_triggered("r1").is_none());
}

#[tokio::test]
async fn start_twice_is_rejected_and_stop_is_idempotent() {
    let fx = cpu_fixture(0);
    fx.metrics.set("vm1", "cpu_usage", 85.0);

    fx.engine.stop();
    assert!(!fx.engine.is_running());

    fx.engine.start().await.unwrap();
    assert!(fx.engine.is_running());
    assert!(matches!(fx.engine.start().await, Err(AlertError::AlreadyRunning)));

    // The first pass runs immediately on start.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while fx.store.incidents().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(fx.store.incidents().len(), 1);

    fx.engine.shutdown().await;
    assert!(!fx.engine.is_running());
    fx.engine.stop();

    fx.engine.start().await.unwrap();
    assert!(fx.engine.is_running());
    fx.engine.shutdown().await;
}

#[test]
fn evaluation_interval_must_be_positive() {
    let fx = fixture();
    assert!(matches!(
        fx.engine.set_evaluation_interval(0),
        Err(AlertError::InvalidInterval)
    ));
    fx.engine.set_evaluation_interval(15).unwrap();
    assert_eq!(fx.engine.evaluation_interval(), std::time::Duration::from_secs(15));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// However values and time move, a rule/VM pair never has two open
    /// incidents and a new one never opens within the cooldown after a
    /// resolve.
    #[test]
    fn at_most_one_open_incident(
        cooldown in 0u64..600,
        steps in prop::collection::vec((1i64..400, 0.0f64..100.0, any::<bool>()), 1..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let fx = cpu_fixture(cooldown);
            fx.engine.reload_rules().await.unwrap();

            for (advance, value, operator_resolve) in steps {
                fx.clock.advance(Duration::seconds(advance));
                fx.metrics.set("vm1", "cpu_usage", value);
                fx.engine.evaluate_once().await;
                if operator_resolve {
                    if let Some(open) = fx.store.incidents().into_iter().find(|i| i.status.is_open()) {
                        fx.engine.resolve(&open.id, "ops", None).await.unwrap();
                    }
                }
                prop_assert!(open_count(&fx.store, "r1", "vm1") <= 1);
            }

            let incidents = fx.store.incidents();
            for pair in incidents.windows(2) {
                let resolved_at = pair[0].resolved_at.unwrap();
                let gap = (pair[1].triggered_at - resolved_at).num_seconds();
                prop_assert!(gap >= cooldown as i64);
            }
            Ok(())
        })?;
    }
}
