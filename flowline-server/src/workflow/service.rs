//! Validation workflow service
//!
//! Orchestrates every reading operation: load → state-machine
//! transition → threshold evaluation → durable commit → notification
//! dispatch. The ordering is load-bearing: a transition is never
//! announced before it is durable, and a notification failure after a
//! successful commit is logged, not surfaced — the durable store
//! reconciles unread counts on the recipient's next connect.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use flowline_common::events::{Audience, EventBus, FlowEvent};
use flowline_common::model::NotificationEvent;
use flowline_common::threshold::{self, AlertLevel, ReadingEvaluation};
use flowline_common::{Error, FlowReading, Result};

use crate::notify::NotificationHub;
use crate::store::{Authority, AuthorityProvider, NotificationStore, ReadingStore};

use super::state_machine::{self, DraftInput, TransitionKind};

/// What a submit call carries: an already-stored reading, or the draft
/// fields to create and submit in one step
#[derive(Debug, Clone)]
pub enum SubmitRequest {
    Existing { reading_id: Uuid },
    Draft(DraftInput),
}

/// Result of a successful submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub reading: FlowReading,
    pub evaluation: ReadingEvaluation,
}

/// The workflow orchestrator; collaborators are injected seams
pub struct WorkflowService {
    readings: Arc<dyn ReadingStore>,
    authority: Arc<dyn AuthorityProvider>,
    notifications: Arc<dyn NotificationStore>,
    hub: Arc<NotificationHub>,
    bus: EventBus,
}

impl WorkflowService {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        authority: Arc<dyn AuthorityProvider>,
        notifications: Arc<dyn NotificationStore>,
        hub: Arc<NotificationHub>,
        bus: EventBus,
    ) -> Self {
        Self {
            readings,
            authority,
            notifications,
            hub,
            bus,
        }
    }

    /// Create a new Draft or edit an existing Draft/Rejected reading
    pub async fn save_draft(
        &self,
        reading_id: Option<Uuid>,
        input: DraftInput,
    ) -> Result<FlowReading> {
        match reading_id {
            Some(id) => {
                let current = self.load_reading(id).await?;
                let edited = state_machine::edit_draft(&current, input.measurements, input.notes)?;
                let committed = self.readings.commit(edited, current.version).await?;
                info!(reading_id = %committed.id, version = committed.version, "Draft updated");
                Ok(committed)
            }
            None => {
                // Probe for a collision first so the error names the
                // occupying reading; commit remains the atomic check
                let draft = state_machine::create_draft(input)?;
                if let Some(existing) =
                    self.readings.find_active_in_slot(&draft.slot_key()).await?
                {
                    return Err(Error::Conflict {
                        existing: Some(existing.id),
                    });
                }
                let committed = self.readings.commit(draft, 0).await?;
                info!(reading_id = %committed.id, "Draft created");
                Ok(committed)
            }
        }
    }

    /// Submit a reading for validation.
    ///
    /// Evaluates the measurements against the pipeline's active
    /// threshold; a Breach escalates the validator notification to
    /// Urgent, a Warning to High.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let current = match request {
            SubmitRequest::Existing { reading_id } => self.load_reading(reading_id).await?,
            SubmitRequest::Draft(input) => state_machine::create_draft(input)?,
        };

        let (candidate, kind) = state_machine::submit(&current, Utc::now())?;

        if let Some(existing) = self
            .readings
            .find_active_in_slot(&candidate.slot_key())
            .await?
        {
            if existing.id != candidate.id {
                return Err(Error::Conflict {
                    existing: Some(existing.id),
                });
            }
        }

        let threshold = self.readings.active_threshold(candidate.pipeline_id).await?;
        let evaluation = threshold::evaluate_reading(&candidate.measurements, threshold.as_ref());

        let committed = self.readings.commit(candidate, current.version).await?;

        let resubmission = matches!(kind, TransitionKind::Submitted { resubmission: true });
        info!(
            reading_id = %committed.id,
            pipeline_id = %committed.pipeline_id,
            alert_level = %evaluation.overall,
            resubmission,
            "Reading submitted"
        );

        // Announce only after the durable commit
        self.notify_validators(&committed, &evaluation).await;

        self.bus.emit_lossy(FlowEvent::ReadingSubmitted {
            reading_id: committed.id,
            pipeline_id: committed.pipeline_id,
            slot_id: committed.slot_id,
            reading_date: committed.reading_date,
            recorded_by: committed.recorded_by,
            alert_level: evaluation.overall,
            timestamp: Utc::now(),
        });
        if evaluation.overall == AlertLevel::Breach {
            self.bus.emit_lossy(FlowEvent::ThresholdBreached {
                reading_id: committed.id,
                pipeline_id: committed.pipeline_id,
                parameters: evaluation.breached_parameters(),
                timestamp: Utc::now(),
            });
        }

        Ok(SubmitOutcome {
            reading: committed,
            evaluation,
        })
    }

    /// Approve a submitted reading.
    ///
    /// Re-runs the threshold evaluation so a reading validated despite
    /// a breach still reaches its recorder at Urgent severity.
    pub async fn validate(&self, reading_id: Uuid, validator: Uuid) -> Result<FlowReading> {
        self.require_validator(validator).await?;
        let current = self.load_reading(reading_id).await?;
        let validated = state_machine::validate(&current, validator, Utc::now())?;

        let threshold = self.readings.active_threshold(validated.pipeline_id).await?;
        let evaluation = threshold::evaluate_reading(&validated.measurements, threshold.as_ref());

        let committed = self.readings.commit(validated, current.version).await?;

        info!(
            reading_id = %committed.id,
            validator = %validator,
            alert_level = %evaluation.overall,
            "Reading validated"
        );

        let (severity, message) = if evaluation.overall == AlertLevel::Breach {
            let parameters = evaluation
                .breached_parameters()
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            (
                flowline_common::model::Severity::Urgent,
                format!(
                    "Your reading for pipeline {} on {} was validated; it breaches threshold ({})",
                    committed.pipeline_id, committed.reading_date, parameters
                ),
            )
        } else {
            (
                flowline_common::model::Severity::Normal,
                format!(
                    "Your reading for pipeline {} on {} was validated",
                    committed.pipeline_id, committed.reading_date
                ),
            )
        };
        let event = NotificationEvent {
            id: Uuid::new_v4(),
            title: "Reading validated".to_string(),
            message,
            severity,
            entity: flowline_common::model::EntityRef::Reading(committed.id),
            created_at: Utc::now(),
        };
        self.notify_user(committed.recorded_by, &event).await;

        self.bus.emit_lossy(FlowEvent::ReadingValidated {
            reading_id: committed.id,
            pipeline_id: committed.pipeline_id,
            validated_by: validator,
            recorded_by: committed.recorded_by,
            timestamp: Utc::now(),
        });

        Ok(committed)
    }

    /// Reject a submitted reading with a reason
    pub async fn reject(
        &self,
        reading_id: Uuid,
        validator: Uuid,
        reason: &str,
    ) -> Result<FlowReading> {
        self.require_validator(validator).await?;
        let current = self.load_reading(reading_id).await?;
        let rejected = state_machine::reject(&current, validator, reason, Utc::now())?;
        let committed = self.readings.commit(rejected, current.version).await?;

        let reason = committed
            .rejection_reason
            .clone()
            .unwrap_or_default();
        info!(reading_id = %committed.id, validator = %validator, "Reading rejected");

        let event = NotificationEvent {
            id: Uuid::new_v4(),
            title: "Reading rejected".to_string(),
            message: format!(
                "Your reading for pipeline {} on {} was rejected: {}",
                committed.pipeline_id, committed.reading_date, reason
            ),
            severity: flowline_common::model::Severity::High,
            entity: flowline_common::model::EntityRef::Reading(committed.id),
            created_at: Utc::now(),
        };
        self.notify_user(committed.recorded_by, &event).await;

        self.bus.emit_lossy(FlowEvent::ReadingRejected {
            reading_id: committed.id,
            pipeline_id: committed.pipeline_id,
            validated_by: validator,
            recorded_by: committed.recorded_by,
            reason,
            timestamp: Utc::now(),
        });

        Ok(committed)
    }

    /// Load one reading
    pub async fn get(&self, reading_id: Uuid) -> Result<FlowReading> {
        self.load_reading(reading_id).await
    }

    /// All readings awaiting validation (the review queue)
    pub async fn list_pending(&self) -> Result<Vec<FlowReading>> {
        self.readings.list_pending().await
    }

    async fn load_reading(&self, id: Uuid) -> Result<FlowReading> {
        self.readings
            .load(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("reading {id}")))
    }

    async fn require_validator(&self, user_id: Uuid) -> Result<()> {
        if self
            .authority
            .has_authority(user_id, Authority::ValidateReadings)
            .await?
        {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "user {user_id} does not hold validate authority"
            )))
        }
    }

    /// Compose the submission notification and fan it out to every
    /// validator: durable append per recipient first, live push after
    async fn notify_validators(&self, reading: &FlowReading, evaluation: &ReadingEvaluation) {
        let severity = evaluation.overall.severity();
        let message = match evaluation.overall {
            AlertLevel::Breach => {
                let parameters = evaluation
                    .breached_parameters()
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "Reading for pipeline {} on {} breaches threshold ({})",
                    reading.pipeline_id, reading.reading_date, parameters
                )
            }
            AlertLevel::Warning => format!(
                "Reading for pipeline {} on {} is near its threshold",
                reading.pipeline_id, reading.reading_date
            ),
            AlertLevel::Normal => format!(
                "Reading for pipeline {} on {} awaits validation",
                reading.pipeline_id, reading.reading_date
            ),
        };
        let event = NotificationEvent {
            id: Uuid::new_v4(),
            title: match evaluation.overall {
                AlertLevel::Breach => "Threshold breach".to_string(),
                AlertLevel::Warning => "Reading needs attention".to_string(),
                AlertLevel::Normal => "Reading submitted".to_string(),
            },
            message,
            severity,
            entity: flowline_common::model::EntityRef::Reading(reading.id),
            created_at: Utc::now(),
        };

        match self.authority.holders(Authority::ValidateReadings).await {
            Ok(holders) => {
                for recipient in holders {
                    if let Err(e) = self.notifications.append(recipient, &event).await {
                        warn!(
                            event_id = %event.id,
                            recipient = %recipient,
                            error = %e,
                            "Failed to append notification to durable store"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve validator list for notification");
            }
        }

        self.hub.publish(&event, Audience::Validators);
    }

    /// Durable append then live push for one recipient
    async fn notify_user(&self, recipient: Uuid, event: &NotificationEvent) {
        if let Err(e) = self.notifications.append(recipient, event).await {
            warn!(
                event_id = %event.id,
                recipient = %recipient,
                error = %e,
                "Failed to append notification to durable store"
            );
        }
        self.hub.publish(event, Audience::User(recipient));
    }
}
