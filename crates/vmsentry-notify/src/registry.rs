use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::channels::email::{EmailChannel, MailSender};
use crate::channels::in_app::{InAppChannel, InAppPublisher};
use crate::channels::sms::{SmsChannel, SmsGateway};
use crate::channels::webhook::WebhookChannel;
use crate::error::Result;
use crate::NotificationChannel;

/// Channels available to the dispatcher, keyed by method name.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use vmsentry_notify::channels::in_app::BroadcastPublisher;
/// use vmsentry_notify::channels::sms::LoggingSmsGateway;
/// use vmsentry_notify::registry::ChannelRegistry;
///
/// let registry = ChannelRegistry::builtin(
///     None,
///     Arc::new(LoggingSmsGateway),
///     Arc::new(BroadcastPublisher::new(16)),
///     Duration::from_secs(10),
/// )
/// .unwrap();
/// assert!(registry.has_channel("email"));
/// assert!(registry.has_channel("inApp"));
/// assert!(!registry.has_channel("pager"));
/// ```
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in channels over the given transports.
    pub fn builtin(
        mailer: Option<Arc<dyn MailSender>>,
        sms: Arc<dyn SmsGateway>,
        in_app: Arc<dyn InAppPublisher>,
        webhook_timeout: Duration,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(EmailChannel::new(mailer)));
        registry.register(Arc::new(SmsChannel::new(sms)));
        registry.register(Arc::new(WebhookChannel::new(webhook_timeout)?));
        registry.register(Arc::new(InAppChannel::new(in_app)));
        Ok(registry)
    }

    /// Registers a channel under its `channel_type()`, replacing any
    /// previous one.
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        let name = channel.channel_type().to_string();
        self.channels.insert(name, channel);
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.get(method).cloned()
    }

    pub fn has_channel(&self, method: &str) -> bool {
        self.channels.contains_key(method)
    }

    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
