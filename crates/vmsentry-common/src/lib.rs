//! Domain types shared by the vmsentry alerting crates.
//!
//! Rules, conditions and incidents are defined here so that the evaluation
//! engine, the notification dispatcher and the storage layer agree on a
//! single representation.

pub mod id;
pub mod types;
