//! Built-in notification channels.

pub mod email;
pub mod in_app;
pub mod sms;
pub mod webhook;

pub const EMAIL: &str = "email";
pub const SMS: &str = "sms";
pub const WEBHOOK: &str = "webhook";
pub const IN_APP: &str = "inApp";
