//! SeaORM-backed persistence for the alert engine.
//!
//! [`store::AlertStore`] owns the database connection, runs the schema
//! migrations on connect and implements the engine's
//! [`RuleRepository`](vmsentry_alert::RuleRepository),
//! [`EntityDirectory`](vmsentry_alert::EntityDirectory) and
//! [`MetricAccessor`](vmsentry_alert::MetricAccessor) traits. It also
//! carries the rule, VM and metric management operations used by the API
//! layer and the seeding tool.

pub mod entities;
pub mod error;
pub mod store;


pub use store::{AlertStore, IncidentStats, NewCondition, RuleDraft};
