//! Notification delivery for alert incidents.
//!
//! A newly opened incident is fanned out to every method listed in the
//! rule's [`NotificationConfig`] (email, SMS, webhook, in-app). Channels run
//! concurrently and fail independently; every listed method yields one
//! [`ChannelResult`](vmsentry_common::types::ChannelResult) that is recorded
//! on the incident.

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod utils;


use async_trait::async_trait;
use vmsentry_common::types::{Incident, NotificationConfig};

use crate::error::Result;

/// A delivery channel for incidents.
///
/// Each channel reads its own section of the [`NotificationConfig`] and
/// fails with [`NotifyError::ChannelDisabled`](error::NotifyError::ChannelDisabled)
/// when that section is absent or disabled.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the incident. `Ok` carries an optional detail message for
    /// the audit record.
    async fn send(&self, incident: &Incident, config: &NotificationConfig) -> Result<Option<String>>;

    /// The method name this channel is registered under (e.g. `"webhook"`).
    fn channel_type(&self) -> &str;
}
