//! Reading lifecycle state machine
//!
//! Pure transition functions for a single reading: each takes the
//! current reading plus the event payload and returns the transitioned
//! copy, or a typed domain error. No I/O and no clock reads; callers
//! pass `now` in, which keeps transitions reproducible in tests.
//!
//! Lifecycle: `Draft → Submitted → {Validated, Rejected}`, with
//! `Rejected → Submitted` as the resubmission path under the same
//! reading identity. Validated is terminal.
//!
//! The slot-uniqueness guard is NOT checked here: it requires store
//! state and is enforced atomically by [`ReadingStore::commit`]. The
//! same goes for validator authority, which the workflow service
//! checks; the machine enforces only the structural guards (status,
//! field validity, self-validation).
//!
//! [`ReadingStore::commit`]: crate::store::ReadingStore::commit

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use flowline_common::model::{
    validate_notes, validate_rejection_reason, Measurements, ValidationStatus,
};
use flowline_common::{Error, FlowReading, Result};

/// Which transition a successful call performed, for event emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    DraftSaved,
    Submitted { resubmission: bool },
    Validated,
    Rejected,
}

/// Fields an operator supplies when creating or editing a draft
#[derive(Debug, Clone)]
pub struct DraftInput {
    pub pipeline_id: Uuid,
    pub reading_date: NaiveDate,
    pub slot_id: Uuid,
    pub measurements: Measurements,
    pub notes: Option<String>,
    pub recorded_by: Uuid,
}

/// Create a new Draft reading. Partial measurements are allowed while
/// drafting; the at-least-one-measurement guard applies at submit.
pub fn create_draft(input: DraftInput) -> Result<FlowReading> {
    validate_notes(&input.notes)?;
    Ok(FlowReading {
        id: Uuid::new_v4(),
        pipeline_id: input.pipeline_id,
        reading_date: input.reading_date,
        slot_id: input.slot_id,
        measurements: input.measurements,
        recorded_by: input.recorded_by,
        recorded_at: None,
        notes: input.notes,
        status: ValidationStatus::Draft,
        validated_by: None,
        validated_at: None,
        rejection_reason: None,
        version: 0,
    })
}

/// Edit a Draft or Rejected reading's measurements and notes.
/// Editing keeps the current status; a Rejected reading stays Rejected
/// (and keeps its reason) until it is resubmitted.
pub fn edit_draft(
    reading: &FlowReading,
    measurements: Measurements,
    notes: Option<String>,
) -> Result<FlowReading> {
    match reading.status {
        ValidationStatus::Draft | ValidationStatus::Rejected => {}
        current => {
            return Err(Error::InvalidState {
                current: current.to_string(),
                event: "edit".to_string(),
            })
        }
    }
    validate_notes(&notes)?;

    let mut edited = reading.clone();
    edited.measurements = measurements;
    edited.notes = notes;
    Ok(edited)
}

/// Submit a Draft or Rejected reading for validation.
///
/// The returned candidate clears any previous rejection reason; since
/// the stored row only changes when the commit succeeds, a failed
/// resubmission leaves the last reason visible.
pub fn submit(
    reading: &FlowReading,
    now: DateTime<Utc>,
) -> Result<(FlowReading, TransitionKind)> {
    let resubmission = match reading.status {
        ValidationStatus::Draft => false,
        ValidationStatus::Rejected => true,
        current => {
            return Err(Error::InvalidState {
                current: current.to_string(),
                event: "submit".to_string(),
            })
        }
    };

    if reading.measurements.is_empty() {
        return Err(Error::Validation(
            "at least one measurement is required to submit".to_string(),
        ));
    }

    let mut submitted = reading.clone();
    submitted.status = ValidationStatus::Submitted;
    submitted.recorded_at = Some(now);
    submitted.validated_by = None;
    submitted.validated_at = None;
    submitted.rejection_reason = None;
    Ok((submitted, TransitionKind::Submitted { resubmission }))
}

/// Approve a Submitted reading.
///
/// Segregation of duties: the validator must not be the operator who
/// recorded the reading.
pub fn validate(
    reading: &FlowReading,
    validator: Uuid,
    now: DateTime<Utc>,
) -> Result<FlowReading> {
    if reading.status != ValidationStatus::Submitted {
        return Err(Error::InvalidState {
            current: reading.status.to_string(),
            event: "validate".to_string(),
        });
    }
    if validator == reading.recorded_by {
        return Err(Error::Forbidden(
            "a reading cannot be validated by the user who recorded it".to_string(),
        ));
    }

    let mut validated = reading.clone();
    validated.status = ValidationStatus::Validated;
    validated.validated_by = Some(validator);
    validated.validated_at = Some(now);
    Ok(validated)
}

/// Reject a Submitted reading with a reason.
///
/// No segregation check: rejecting one's own submission is a
/// legitimate withdrawal path.
pub fn reject(
    reading: &FlowReading,
    validator: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<FlowReading> {
    if reading.status != ValidationStatus::Submitted {
        return Err(Error::InvalidState {
            current: reading.status.to_string(),
            event: "reject".to_string(),
        });
    }
    let reason = validate_rejection_reason(reason)?;

    let mut rejected = reading.clone();
    rejected.status = ValidationStatus::Rejected;
    rejected.validated_by = Some(validator);
    rejected.validated_at = Some(now);
    rejected.rejection_reason = Some(reason);
    Ok(rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_common::model::MAX_NOTES_LEN;

    fn input() -> DraftInput {
        DraftInput {
            pipeline_id: Uuid::new_v4(),
            reading_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            slot_id: Uuid::new_v4(),
            measurements: Measurements {
                pressure: Some(250.0),
                ..Default::default()
            },
            notes: None,
            recorded_by: Uuid::new_v4(),
        }
    }

    fn submitted_reading() -> FlowReading {
        let (reading, _) = submit(&create_draft(input()).unwrap(), Utc::now()).unwrap();
        reading
    }

    #[test]
    fn create_allows_empty_measurements() {
        let mut i = input();
        i.measurements = Measurements::default();
        let reading = create_draft(i).unwrap();
        assert_eq!(reading.status, ValidationStatus::Draft);
        assert_eq!(reading.version, 0);
    }

    #[test]
    fn create_rejects_oversized_notes() {
        let mut i = input();
        i.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(matches!(create_draft(i), Err(Error::Validation(_))));
    }

    #[test]
    fn submit_requires_a_measurement() {
        let mut i = input();
        i.measurements = Measurements::default();
        let draft = create_draft(i).unwrap();
        assert!(matches!(
            submit(&draft, Utc::now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn submit_stamps_recorded_at_and_clears_reason() {
        let draft = create_draft(input()).unwrap();
        let now = Utc::now();
        let (submitted, kind) = submit(&draft, now).unwrap();
        assert_eq!(submitted.status, ValidationStatus::Submitted);
        assert_eq!(submitted.recorded_at, Some(now));
        assert_eq!(kind, TransitionKind::Submitted { resubmission: false });
    }

    #[test]
    fn validate_requires_submitted_status() {
        let draft = create_draft(input()).unwrap();
        let err = validate(&draft, Uuid::new_v4(), Utc::now()).unwrap_err();
        match err {
            Error::InvalidState { current, event } => {
                assert_eq!(current, "DRAFT");
                assert_eq!(event, "validate");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn validate_forbids_self_validation() {
        let reading = submitted_reading();
        let err = validate(&reading, reading.recorded_by, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn validate_stamps_validator() {
        let reading = submitted_reading();
        let validator = Uuid::new_v4();
        let validated = validate(&reading, validator, Utc::now()).unwrap();
        assert_eq!(validated.status, ValidationStatus::Validated);
        assert_eq!(validated.validated_by, Some(validator));
        assert!(validated.validated_at.is_some());
    }

    #[test]
    fn validated_is_terminal() {
        let reading = submitted_reading();
        let validated = validate(&reading, Uuid::new_v4(), Utc::now()).unwrap();

        assert!(matches!(
            submit(&validated, Utc::now()),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            validate(&validated, Uuid::new_v4(), Utc::now()),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            reject(&validated, Uuid::new_v4(), "late objection", Utc::now()),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            edit_draft(&validated, Measurements::default(), None),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn reject_requires_five_character_reason() {
        let reading = submitted_reading();
        // Four characters fail, five succeed
        assert!(matches!(
            reject(&reading, Uuid::new_v4(), "nope", Utc::now()),
            Err(Error::Validation(_))
        ));
        let rejected = reject(&reading, Uuid::new_v4(), "wrong", Utc::now()).unwrap();
        assert_eq!(rejected.status, ValidationStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("wrong"));
    }

    #[test]
    fn self_rejection_is_a_withdrawal_path() {
        let reading = submitted_reading();
        let rejected = reject(&reading, reading.recorded_by, "entered wrong slot", Utc::now());
        assert!(rejected.is_ok());
    }

    #[test]
    fn rejected_reading_can_be_edited_and_resubmitted() {
        let reading = submitted_reading();
        let rejected = reject(&reading, Uuid::new_v4(), "pressure implausible", Utc::now()).unwrap();

        // Edits keep the rejection reason until a resubmission commits
        let corrected = edit_draft(
            &rejected,
            Measurements {
                pressure: Some(260.0),
                ..Default::default()
            },
            Some("corrected gauge reading".to_string()),
        )
        .unwrap();
        assert_eq!(corrected.status, ValidationStatus::Rejected);
        assert!(corrected.rejection_reason.is_some());

        let (resubmitted, kind) = submit(&corrected, Utc::now()).unwrap();
        assert_eq!(resubmitted.id, reading.id);
        assert_eq!(resubmitted.status, ValidationStatus::Submitted);
        assert_eq!(resubmitted.rejection_reason, None);
        assert_eq!(kind, TransitionKind::Submitted { resubmission: true });
    }

    #[test]
    fn submit_twice_is_invalid() {
        let reading = submitted_reading();
        assert!(matches!(
            submit(&reading, Utc::now()),
            Err(Error::InvalidState { .. })
        ));
    }
}
