//! Reading validation workflow
//!
//! `state_machine` holds the pure lifecycle transition logic;
//! `service` orchestrates transitions against the stores and drives
//! notification dispatch.

pub mod service;
pub mod state_machine;

pub use service::{SubmitOutcome, SubmitRequest, WorkflowService};
