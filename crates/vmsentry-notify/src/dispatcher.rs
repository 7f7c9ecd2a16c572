use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use vmsentry_alert::{IncidentNotifier, RuleRepository};
use vmsentry_common::types::{ChannelResult, Incident, NotificationConfig};

use crate::channels::IN_APP;
use crate::registry::ChannelRegistry;

/// Queue sizing for background delivery.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub queue_capacity: usize,
    pub max_concurrent: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent: 8,
        }
    }
}

/// Methods to notify for a config; an empty list means in-app only.
pub fn effective_methods(config: &NotificationConfig) -> Vec<String> {
    if config.methods.is_empty() {
        vec![IN_APP.to_string()]
    } else {
        config.methods.clone()
    }
}

/// Fans an incident out to its configured channels.
pub struct NotificationDispatcher {
    registry: ChannelRegistry,
    repo: Option<Arc<dyn RuleRepository>>,
}

impl NotificationDispatcher {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self {
            registry,
            repo: None,
        }
    }

    /// Results of queued deliveries are written back through `repo`.
    pub fn with_repository(mut self, repo: Arc<dyn RuleRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Delivers through every method concurrently and returns one result
    /// per method, in configuration order. Never fails as a whole.
    pub async fn dispatch(&self, incident: &Incident, config: &NotificationConfig) -> Vec<ChannelResult> {
        let methods = effective_methods(config);
        let mut slots: Vec<Option<ChannelResult>> = vec![None; methods.len()];
        let mut tasks = JoinSet::new();

        for (idx, method) in methods.iter().enumerate() {
            let Some(channel) = self.registry.get(method) else {
                tracing::warn!(incident_id = %incident.id, method = %method, "Unknown notification method");
                slots[idx] = Some(ChannelResult::failure(method, "unknown channel"));
                continue;
            };
            let incident = incident.clone();
            let config = config.clone();
            let method = method.clone();
            tasks.spawn(async move {
                let result = match channel.send(&incident, &config).await {
                    Ok(message) => ChannelResult::success(&method, message),
                    Err(e) => {
                        tracing::warn!(incident_id = %incident.id, method = %method, error = %e, "Notification delivery failed");
                        ChannelResult::failure(&method, e.to_string())
                    }
                };
                (idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => tracing::error!(incident_id = %incident.id, error = %e, "Notification task panicked"),
            }
        }

        slots
            .into_iter()
            .zip(methods)
            .map(|(slot, method)| {
                slot.unwrap_or_else(|| ChannelResult::failure(&method, "delivery task aborted"))
            })
            .collect()
    }

    /// Dispatches and records the outcome on the incident.
    pub async fn deliver(&self, incident: &Incident, config: &NotificationConfig) -> Vec<ChannelResult> {
        let results = self.dispatch(incident, config).await;
        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(
            incident_id = %incident.id,
            channels = results.len(),
            failed,
            "Notifications dispatched"
        );

        if let Some(repo) = &self.repo {
            if let Err(e) = repo.record_notifications(&incident.id, &results).await {
                tracing::error!(incident_id = %incident.id, error = %e, "Failed to record notification results");
            }
        }
        results
    }

    /// Spawns the background worker and returns the handle the engine
    /// notifies through.
    pub fn spawn(self: Arc<Self>, options: DispatchOptions) -> DispatchHandle {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let token = CancellationToken::new();
        let worker = tokio::spawn(run_worker(self, rx, options.max_concurrent.max(1), token.clone()));
        DispatchHandle {
            tx,
            token,
            dropped: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        }
    }
}

struct DispatchJob {
    incident: Incident,
    config: NotificationConfig,
}

async fn run_worker(
    dispatcher: Arc<NotificationDispatcher>,
    mut rx: mpsc::Receiver<DispatchJob>,
    max_concurrent: usize,
    token: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut inflight = JoinSet::new();
    let mut closing = false;

    loop {
        let job = tokio::select! {
            _ = token.cancelled(), if !closing => {
                // Stop accepting; whatever is already queued is still sent.
                rx.close();
                closing = true;
                continue;
            }
            job = rx.recv() => job,
        };
        let Some(job) = job else { break };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let dispatcher = Arc::clone(&dispatcher);
        inflight.spawn(async move {
            dispatcher.deliver(&job.incident, &job.config).await;
            drop(permit);
        });
        while inflight.try_join_next().is_some() {}
    }

    while inflight.join_next().await.is_some() {}
    tracing::info!("Notification worker stopped");
}

/// Producer side of the delivery queue.
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchJob>,
    token: CancellationToken,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchHandle {
    /// Queues an incident without waiting. Returns `false` when the queue
    /// is full or closed; the job is then dropped.
    pub fn enqueue(&self, incident: Incident, config: NotificationConfig) -> bool {
        match self.tx.try_send(DispatchJob { incident, config }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(incident_id = %job.incident.id, "Notification queue full, dropping incident");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(incident_id = %job.incident.id, "Notification queue closed, dropping incident");
                false
            }
        }
    }

    /// Jobs dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting jobs and waits until queued and in-flight deliveries
    /// finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Notification worker panicked");
            }
        }
    }
}

impl IncidentNotifier for DispatchHandle {
    fn notify(&self, incident: Incident, config: NotificationConfig) {
        self.enqueue(incident, config);
    }
}
