use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use vmsentry_alert::engine::{AlertEngine, EngineOptions};
use vmsentry_notify::channels::email::{MailSender, SmtpMailer};
use vmsentry_notify::channels::in_app::BroadcastPublisher;
use vmsentry_notify::channels::sms::{HttpSmsGateway, LoggingSmsGateway, SmsGateway};
use vmsentry_notify::dispatcher::{DispatchHandle, DispatchOptions, NotificationDispatcher};
use vmsentry_notify::registry::ChannelRegistry;
use vmsentry_storage::AlertStore;

use crate::config::{RulesSeedFile, ServerConfig};
use crate::rule_seed;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// The wired alerting service: store, engine and notification worker.
pub struct Runtime {
    pub store: Arc<AlertStore>,
    pub engine: Arc<AlertEngine>,
    pub notifications: Arc<DispatchHandle>,
    /// In-app hub; viewers call `subscribe()` on it.
    pub in_app: Arc<BroadcastPublisher>,
    config: ServerConfig,
    cleanup: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Connects the store, builds the channel registry and spawns the
    /// notification worker. The engine is built but not started.
    pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
        let store = Arc::new(AlertStore::connect(&config.database.connection_url()).await?);

        let in_app = Arc::new(BroadcastPublisher::new(config.notify.in_app_buffer));
        let registry = build_registry(&config, in_app.clone())?;
        tracing::info!(channels = ?registry.channel_names(), "Notification channels registered");

        let dispatcher = Arc::new(NotificationDispatcher::new(registry).with_repository(store.clone()));
        let notifications = Arc::new(dispatcher.spawn(DispatchOptions {
            queue_capacity: config.notify.queue_capacity,
            max_concurrent: config.notify.max_concurrent,
        }));

        let options = EngineOptions {
            evaluation_interval: Duration::from_secs(config.evaluation.interval_secs),
            reload_interval: Duration::from_secs(config.evaluation.reload_interval_secs),
            metric_timeout: Duration::from_secs(config.evaluation.metric_timeout_secs),
        };
        let engine = Arc::new(
            AlertEngine::new(store.clone(), store.clone(), store.clone(), options)
                .with_notifier(notifications.clone()),
        );

        Ok(Self {
            store,
            engine,
            notifications,
            in_app,
            config,
            cleanup: None,
        })
    }

    /// Applies the configured seed file, starts the evaluation loop (when
    /// enabled) and the sample retention task.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if let Some(path) = &self.config.seed.rules_file {
            let seed = RulesSeedFile::load(path)?;
            if let Err(e) = rule_seed::apply_seed(&self.store, &seed).await {
                tracing::error!(path = %path, error = %e, "Failed to apply seed file");
            }
        }

        if self.config.evaluation.enabled {
            self.engine.start().await?;
        } else {
            tracing::info!("Alert evaluation disabled");
        }

        let retention_hours = self.config.database.sample_retention_hours;
        if retention_hours > 0 && self.cleanup.is_none() {
            let store = self.store.clone();
            self.cleanup = Some(tokio::spawn(async move {
                let mut tick = interval(CLEANUP_INTERVAL);
                loop {
                    tick.tick().await;
                    let hours = i64::try_from(retention_hours).unwrap_or(i64::MAX);
                    let Some(cutoff) = chrono::Duration::try_hours(hours)
                        .and_then(|keep| chrono::Utc::now().checked_sub_signed(keep))
                    else {
                        continue;
                    };
                    if let Err(e) = store.prune_samples(cutoff).await {
                        tracing::error!(error = %e, "Metric sample cleanup failed");
                    }
                }
            }));
        }
        Ok(())
    }

    /// Stops the engine, then drains queued notifications.
    pub async fn shutdown(&mut self) {
        self.engine.shutdown().await;
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
        self.notifications.shutdown().await;
        let dropped = self.notifications.dropped();
        if dropped > 0 {
            tracing::warn!(dropped, "Notifications were dropped while running");
        }
    }
}

/// Registers the four built-in channels with transports chosen by config.
pub fn build_registry(
    config: &ServerConfig,
    in_app: Arc<BroadcastPublisher>,
) -> anyhow::Result<ChannelRegistry> {
    let mailer: Option<Arc<dyn MailSender>> = match &config.smtp {
        Some(smtp) => Some(Arc::new(SmtpMailer::new(
            &smtp.host,
            smtp.port,
            smtp.username.as_deref(),
            smtp.password.as_deref(),
            &smtp.from,
            smtp.tls,
        )?)),
        None => {
            tracing::warn!("No [smtp] section configured, email notifications will fail");
            None
        }
    };

    let sms: Arc<dyn SmsGateway> = match &config.sms {
        Some(sms) => Arc::new(HttpSmsGateway::new(
            &sms.gateway_url,
            &sms.api_key,
            Duration::from_secs(sms.timeout_secs),
        )?),
        None => Arc::new(LoggingSmsGateway),
    };

    Ok(ChannelRegistry::builtin(
        mailer,
        sms,
        in_app,
        Duration::from_secs(config.notify.webhook_timeout_secs),
    )?)
}
