//! Admission control: tier classification and sliding-window request quotas.
//!
//! Every convert request passes through the [`AdmissionController`] before a
//! job is created. Rejected requests never reach the queue.

mod controller;
mod types;

pub use controller::AdmissionController;
pub use types::{classify_tier, AdmissionDecision, Tier};
