use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use vmsentry_common::types::Incident;

use crate::cache::{CachedRule, RuleCache};
use crate::error::{AlertError, Result};
use crate::evaluator::ConditionEvaluator;
use crate::lifecycle::{LifecycleManager, Transition};
use crate::scope::ScopeResolver;
use crate::{Clock, EntityDirectory, IncidentNotifier, MetricAccessor, RuleRepository, SystemClock};

/// Timing knobs for the evaluation loop.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub evaluation_interval: Duration,
    pub reload_interval: Duration,
    /// Per-lookup deadline for metric fetches. Values under one second are raised to one second.
    pub metric_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(60),
            reload_interval: Duration::from_secs(300),
            metric_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters for one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub rules: usize,
    pub entities: usize,
    pub opened: usize,
    pub resolved: usize,
    pub suppressed: usize,
    pub cooldown_blocked: usize,
    pub errors: usize,
}

struct LoopHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodic alert evaluator.
///
/// One background task walks the rule snapshot every evaluation interval
/// and is the only writer of automatic incident transitions. Operator
/// commands (`acknowledge`, `resolve`) go through the same lifecycle lock.
pub struct AlertEngine {
    cache: RuleCache,
    resolver: ScopeResolver,
    evaluator: ConditionEvaluator,
    lifecycle: LifecycleManager,
    notifier: Option<Arc<dyn IncidentNotifier>>,
    clock: Arc<dyn Clock>,
    interval_tx: watch::Sender<Duration>,
    reload_interval: Duration,
    running: Mutex<Option<LoopHandle>>,
}

impl AlertEngine {
    pub fn new(
        repo: Arc<dyn RuleRepository>,
        directory: Arc<dyn EntityDirectory>,
        metrics: Arc<dyn MetricAccessor>,
        options: EngineOptions,
    ) -> Self {
        let (interval_tx, _) = watch::channel(options.evaluation_interval.max(Duration::from_secs(1)));
        Self {
            cache: RuleCache::new(repo.clone()),
            resolver: ScopeResolver::new(directory),
            evaluator: ConditionEvaluator::new(metrics, options.metric_timeout.max(Duration::from_secs(1))),
            lifecycle: LifecycleManager::new(repo),
            notifier: None,
            clock: Arc::new(SystemClock),
            interval_tx,
            reload_interval: options.reload_interval.max(Duration::from_secs(1)),
            running: Mutex::new(None),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn IncidentNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Loads the rule snapshot, then spawns the evaluation loop. The loop
    /// runs one pass immediately and then every evaluation interval.
    ///
    /// A failed initial load is logged and the loop starts with whatever
    /// snapshot is cached (empty on first start).
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            return Err(AlertError::AlreadyRunning);
        }

        if let Err(e) = self.cache.reload().await {
            tracing::warn!(error = %e, "Alert engine starting without a fresh rule snapshot");
        }

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return Err(AlertError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(token.clone()));
        *running = Some(LoopHandle { token, task });

        tracing::info!(
            interval_secs = self.evaluation_interval().as_secs(),
            reload_secs = self.reload_interval.as_secs(),
            rules = self.cache.len(),
            "Alert engine started"
        );
        Ok(())
    }

    /// Signals the loop to exit. No-op when not running.
    pub fn stop(&self) {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.token.cancel();
            tracing::info!("Alert engine stopping");
        }
    }

    /// Like [`stop`](Self::stop) but waits for an in-flight pass to finish.
    pub async fn shutdown(&self) {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.token.cancel();
            if let Err(e) = handle.task.await {
                tracing::error!(error = %e, "Alert evaluation task panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    pub fn evaluation_interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Changes the evaluation period. A running loop picks it up at once and
    /// waits one full new period before its next pass.
    pub fn set_evaluation_interval(&self, secs: u64) -> Result<()> {
        if secs == 0 {
            return Err(AlertError::InvalidInterval);
        }
        self.interval_tx.send_replace(Duration::from_secs(secs));
        tracing::info!(interval_secs = secs, "Alert evaluation interval updated");
        Ok(())
    }

    /// Rebuilds the rule cache immediately.
    pub async fn reload_rules(&self) -> Result<usize> {
        self.cache.reload().await
    }

    /// Runs a single evaluation pass over the current snapshot.
    pub async fn evaluate_once(&self) -> PassSummary {
        let rules = self.cache.snapshot();
        let mut summary = PassSummary {
            rules: rules.len(),
            ..PassSummary::default()
        };

        for cached in rules.iter() {
            if let Err(e) = self.evaluate_rule(cached, &mut summary).await {
                summary.errors += 1;
                tracing::error!(
                    rule_id = %cached.rule.id,
                    rule = %cached.rule.name,
                    error = %e,
                    "Failed to evaluate alert rule"
                );
            }
        }

        if summary.opened > 0 || summary.resolved > 0 || summary.errors > 0 {
            tracing::info!(
                rules = summary.rules,
                entities = summary.entities,
                opened = summary.opened,
                resolved = summary.resolved,
                errors = summary.errors,
                "Alert evaluation pass complete"
            );
        } else {
            tracing::debug!(
                rules = summary.rules,
                entities = summary.entities,
                suppressed = summary.suppressed,
                cooldown_blocked = summary.cooldown_blocked,
                "Alert evaluation pass complete"
            );
        }
        summary
    }

    async fn evaluate_rule(&self, cached: &CachedRule, summary: &mut PassSummary) -> Result<()> {
        let rule = &cached.rule;
        let entities = self
            .resolver
            .resolve(rule.scope, rule.scope_id.as_deref())
            .await?;

        // The cooldown gate is taken once per rule, so every VM that trips
        // in this pass can open its incident.
        let may_open = self
            .lifecycle
            .history()
            .cooldown_expired(&rule.id, rule.cooldown_secs, self.clock.now());

        for entity in &entities {
            summary.entities += 1;
            let now = self.clock.now();
            let evaluation = self
                .evaluator
                .evaluate(rule.logic, &cached.conditions, entity, now)
                .await;

            match self
                .lifecycle
                .apply(rule, entity, &evaluation, may_open, now)
                .await
            {
                Ok(Transition::Opened(incident)) => {
                    summary.opened += 1;
                    self.dispatch(incident, cached);
                }
                Ok(Transition::Resolved(_)) => summary.resolved += 1,
                Ok(Transition::Suppressed) => summary.suppressed += 1,
                Ok(Transition::CooldownActive) => summary.cooldown_blocked += 1,
                Ok(Transition::Idle) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(
                        rule = %rule.name,
                        entity_id = %entity.id,
                        error = %e,
                        "Failed to apply alert transition"
                    );
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, incident: Incident, cached: &CachedRule) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(incident, cached.rule.notification.clone());
        }
    }

    /// Operator acknowledgement: active -> acknowledged.
    pub async fn acknowledge(
        &self,
        incident_id: &str,
        operator: &str,
        note: Option<String>,
    ) -> Result<Incident> {
        self.lifecycle
            .acknowledge(incident_id, operator, note, self.clock.now())
            .await
    }

    /// Acknowledges each id independently and returns the per-id outcome.
    pub async fn batch_acknowledge(
        &self,
        incident_ids: &[String],
        operator: &str,
        note: Option<String>,
    ) -> Vec<(String, Result<Incident>)> {
        let mut outcomes = Vec::with_capacity(incident_ids.len());
        for id in incident_ids {
            let outcome = self.acknowledge(id, operator, note.clone()).await;
            outcomes.push((id.clone(), outcome));
        }
        outcomes
    }

    /// Operator resolution: active|acknowledged -> resolved.
    pub async fn resolve(
        &self,
        incident_id: &str,
        operator: &str,
        resolution: Option<String>,
    ) -> Result<Incident> {
        self.lifecycle
            .resolve(incident_id, operator, resolution, self.clock.now())
            .await
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut interval_rx = self.interval_tx.subscribe();
        let period = *interval_rx.borrow_and_update();

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reload = interval_at(Instant::now() + self.reload_interval, self.reload_interval);
        reload.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Ok(()) = interval_rx.changed() => {
                    let period = *interval_rx.borrow_and_update();
                    ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
                _ = reload.tick() => {
                    // Failures are logged by the cache; the old snapshot stays.
                    let _ = self.cache.reload().await;
                }
                _ = ticker.tick() => {
                    self.evaluate_once().await;
                }
            }
        }
        tracing::info!("Alert evaluation loop stopped");
    }
}
