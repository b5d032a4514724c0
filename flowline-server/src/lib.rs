//! # FlowLine Server Library (flowline-server)
//!
//! Validation workflow and real-time alerting core for pipeline flow
//! readings.
//!
//! **Purpose:** take operator-submitted readings through the
//! Draft → Submitted → Validated/Rejected lifecycle, evaluate them
//! against per-pipeline thresholds, and push submissions and outcomes
//! live to connected notification sessions over HTTP/SSE.

pub mod api;
pub mod config;
pub mod db;
pub mod notify;
pub mod store;
pub mod workflow;

pub use flowline_common::{Error, Result};
