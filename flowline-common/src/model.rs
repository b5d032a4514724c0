//! Domain model for FlowLine
//!
//! Readings, thresholds, notification events, and the slot uniqueness
//! key. Storage/wire form for enums is SCREAMING_SNAKE; `SUBMITTED` is
//! the canonical pending-validation code.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum length of free-text notes on a reading
pub const MAX_NOTES_LEN: usize = 500;

/// Minimum length of a rejection reason (after trimming)
pub const MIN_REJECTION_REASON_LEN: usize = 5;

/// One measured channel of a flow reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasuredParameter {
    Pressure,
    Temperature,
    FlowRate,
    ContainedVolume,
}

impl MeasuredParameter {
    /// All parameters, in display order
    pub const ALL: [MeasuredParameter; 4] = [
        MeasuredParameter::Pressure,
        MeasuredParameter::Temperature,
        MeasuredParameter::FlowRate,
        MeasuredParameter::ContainedVolume,
    ];
}

impl std::fmt::Display for MeasuredParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MeasuredParameter::Pressure => "pressure",
            MeasuredParameter::Temperature => "temperature",
            MeasuredParameter::FlowRate => "flow rate",
            MeasuredParameter::ContainedVolume => "contained volume",
        };
        write!(f, "{}", name)
    }
}

/// The four optional measurement channels of one reading
///
/// Units: pressure in bar, temperature in °C, flow rate in m³/h,
/// contained volume in m³. At least one channel must be present before
/// a reading can be submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub pressure: Option<f64>,
    pub temperature: Option<f64>,
    pub flow_rate: Option<f64>,
    pub contained_volume: Option<f64>,
}

impl Measurements {
    /// Value of one channel, if recorded
    pub fn get(&self, param: MeasuredParameter) -> Option<f64> {
        match param {
            MeasuredParameter::Pressure => self.pressure,
            MeasuredParameter::Temperature => self.temperature,
            MeasuredParameter::FlowRate => self.flow_rate,
            MeasuredParameter::ContainedVolume => self.contained_volume,
        }
    }

    /// All recorded channels as `(parameter, value)` pairs
    pub fn present(&self) -> Vec<(MeasuredParameter, f64)> {
        MeasuredParameter::ALL
            .iter()
            .filter_map(|&p| self.get(p).map(|v| (p, v)))
            .collect()
    }

    /// True when no channel is recorded
    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }
}

/// Lifecycle status of a flow reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Draft,
    Submitted,
    Validated,
    Rejected,
}

impl ValidationStatus {
    /// Canonical storage/wire code
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Draft => "DRAFT",
            ValidationStatus::Submitted => "SUBMITTED",
            ValidationStatus::Validated => "VALIDATED",
            ValidationStatus::Rejected => "REJECTED",
        }
    }

    /// Parse the canonical storage code
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "DRAFT" => Ok(ValidationStatus::Draft),
            "SUBMITTED" => Ok(ValidationStatus::Submitted),
            "VALIDATED" => Ok(ValidationStatus::Validated),
            "REJECTED" => Ok(ValidationStatus::Rejected),
            other => Err(Error::Validation(format!(
                "unknown validation status '{}'",
                other
            ))),
        }
    }

    /// Whether a reading in this status occupies its slot for the
    /// one-active-reading-per-slot invariant. Only rejection frees the
    /// slot for resubmission.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, ValidationStatus::Rejected)
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The uniqueness key: at most one slot-occupying reading per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub pipeline_id: Uuid,
    pub reading_date: NaiveDate,
    pub slot_id: Uuid,
}

/// One measurement event for a pipeline/date/slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowReading {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub reading_date: NaiveDate,
    pub slot_id: Uuid,
    pub measurements: Measurements,
    /// Operator who recorded the measurements
    pub recorded_by: Uuid,
    /// Set when a submission commits; None while Draft
    pub recorded_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub status: ValidationStatus,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
    /// Latest rejection reason; cleared only when a resubmission commits
    pub rejection_reason: Option<String>,
    /// Optimistic-lock version; starts at 1, +1 per committed transition
    pub version: i64,
}

impl FlowReading {
    /// Slot uniqueness key for this reading
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            pipeline_id: self.pipeline_id,
            reading_date: self.reading_date,
            slot_id: self.slot_id,
        }
    }
}

/// Fixed daily time window readings are recorded against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingSlot {
    pub id: Uuid,
    pub label: String,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
}

/// Configured min/max bounds plus warning tolerance for one pipeline
///
/// A parameter participates in threshold evaluation only when both of
/// its bounds are present. At most one active threshold exists per
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowThreshold {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pressure_min: Option<f64>,
    pub pressure_max: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub flow_rate_min: Option<f64>,
    pub flow_rate_max: Option<f64>,
    pub contained_volume_min: Option<f64>,
    pub contained_volume_max: Option<f64>,
    /// Warning band width as a percentage of the min-max span, 0..=50
    pub alert_tolerance_percent: f64,
    pub active: bool,
}

impl FlowThreshold {
    /// Configured bounds for one parameter, when both ends are set
    pub fn bounds(&self, param: MeasuredParameter) -> Option<crate::threshold::Bounds> {
        let (min, max) = match param {
            MeasuredParameter::Pressure => (self.pressure_min, self.pressure_max),
            MeasuredParameter::Temperature => (self.temperature_min, self.temperature_max),
            MeasuredParameter::FlowRate => (self.flow_rate_min, self.flow_rate_max),
            MeasuredParameter::ContainedVolume => {
                (self.contained_volume_min, self.contained_volume_max)
            }
        };
        match (min, max) {
            (Some(min), Some(max)) => Some(crate::threshold::Bounds { min, max }),
            _ => None,
        }
    }

    /// Reject tolerance outside [0, 50] and any inverted bound pair
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=50.0).contains(&self.alert_tolerance_percent) {
            return Err(Error::Validation(format!(
                "alert tolerance must be within 0..=50 percent, got {}",
                self.alert_tolerance_percent
            )));
        }
        for param in MeasuredParameter::ALL {
            if let Some(b) = self.bounds(param) {
                if b.min > b.max {
                    return Err(Error::Validation(format!(
                        "{} threshold has min {} above max {}",
                        param, b.min, b.max
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Notification severity, ordered for aggregation and queue shedding
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Normal,
    High,
    Urgent,
}

/// Which record a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "entity_id", rename_all = "snake_case")]
pub enum EntityRef {
    Reading(Uuid),
    Pipeline(Uuid),
}

/// One notification generated by the workflow
///
/// Per-recipient read state (`is_read`, `read_at`) is bookkeeping held
/// by the durable notification store, not by the event itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    #[serde(flatten)]
    pub entity: EntityRef,
    pub created_at: DateTime<Utc>,
}

/// Validate a notes field against [`MAX_NOTES_LEN`]
pub fn validate_notes(notes: &Option<String>) -> Result<()> {
    if let Some(n) = notes {
        if n.chars().count() > MAX_NOTES_LEN {
            return Err(Error::Validation(format!(
                "notes exceed {} characters",
                MAX_NOTES_LEN
            )));
        }
    }
    Ok(())
}

/// Validate a rejection reason against [`MIN_REJECTION_REASON_LEN`],
/// returning the trimmed form
pub fn validate_rejection_reason(reason: &str) -> Result<String> {
    let trimmed = reason.trim();
    if trimmed.chars().count() < MIN_REJECTION_REASON_LEN {
        return Err(Error::Validation(format!(
            "rejection reason must be at least {} characters",
            MIN_REJECTION_REASON_LEN
        )));
    }
    Ok(trimmed.to_string())
}
