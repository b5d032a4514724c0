//! # FlowLine Common Library
//!
//! Shared code for the FlowLine flow-reading validation service:
//! - Domain model (readings, thresholds, notifications)
//! - Threshold evaluation (pure classification math)
//! - Event types (FlowEvent enum, push frames) and EventBus
//! - Error taxonomy

pub mod error;
pub mod events;
pub mod model;
pub mod threshold;

pub use error::{Error, Result};
pub use model::{FlowReading, FlowThreshold, ValidationStatus};
pub use threshold::AlertLevel;
