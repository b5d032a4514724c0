//! Event types for the FlowLine event system
//!
//! `FlowEvent` is the process-wide event enum broadcast over the
//! EventBus and serialized for the ops SSE stream. `PushMessage` is the
//! per-user session frame enum delivered through notification sessions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{MeasuredParameter, NotificationEvent, Severity};
use crate::threshold::AlertLevel;

/// FlowLine workflow events
///
/// Events are broadcast via EventBus and serialized for SSE
/// transmission (`event:` field = [`FlowEvent::event_type`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// A reading was submitted for validation
    ReadingSubmitted {
        reading_id: Uuid,
        pipeline_id: Uuid,
        slot_id: Uuid,
        reading_date: chrono::NaiveDate,
        recorded_by: Uuid,
        /// Overall threshold classification at submission time
        alert_level: AlertLevel,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A submitted reading was approved by a validator
    ReadingValidated {
        reading_id: Uuid,
        pipeline_id: Uuid,
        validated_by: Uuid,
        recorded_by: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A submitted reading was rejected; the slot is free again
    ReadingRejected {
        reading_id: Uuid,
        pipeline_id: Uuid,
        validated_by: Uuid,
        recorded_by: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A submission carried at least one out-of-bounds measurement
    ThresholdBreached {
        reading_id: Uuid,
        pipeline_id: Uuid,
        parameters: Vec<MeasuredParameter>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A notification session connected
    SessionOpened {
        session_id: Uuid,
        user_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A notification session closed (client disconnect, explicit
    /// close, or heartbeat timeout)
    SessionClosed {
        session_id: Uuid,
        user_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl FlowEvent {
    /// SSE event name for this event
    pub fn event_type(&self) -> &'static str {
        match self {
            FlowEvent::ReadingSubmitted { .. } => "ReadingSubmitted",
            FlowEvent::ReadingValidated { .. } => "ReadingValidated",
            FlowEvent::ReadingRejected { .. } => "ReadingRejected",
            FlowEvent::ThresholdBreached { .. } => "ThresholdBreached",
            FlowEvent::SessionOpened { .. } => "SessionOpened",
            FlowEvent::SessionClosed { .. } => "SessionClosed",
        }
    }
}

/// Who a published notification is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every connected session whose user holds validate authority
    Validators,
    /// Every connected session of one specific user
    User(Uuid),
}

/// Frames delivered over a per-user notification session stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    /// First frame on every new session: identifies the session and
    /// carries the client's heartbeat and reconnect parameters
    SessionEstablished {
        session_id: Uuid,
        user_id: Uuid,
        heartbeat_interval_secs: u64,
        heartbeat_miss_limit: u32,
        reconnect_base_delay_ms: u64,
        reconnect_max_delay_ms: u64,
        /// Unread count at connect time (durable-store baseline)
        unread_count: u64,
    },

    /// A full notification payload
    Notification { event: NotificationEvent },

    /// Lightweight badge update, independent of full payloads
    UnreadCount { count: u64 },
}

impl PushMessage {
    /// Frame name used as the SSE `event:` field
    pub fn frame_type(&self) -> &'static str {
        match self {
            PushMessage::SessionEstablished { .. } => "SessionEstablished",
            PushMessage::Notification { .. } => "Notification",
            PushMessage::UnreadCount { .. } => "UnreadCount",
        }
    }

    /// Rank of this frame in the queue shed ordering. The hello frame
    /// must survive any backlog; badge updates are the first to go.
    pub fn severity(&self) -> Severity {
        match self {
            PushMessage::SessionEstablished { .. } => Severity::Urgent,
            PushMessage::Notification { event } => event.severity,
            PushMessage::UnreadCount { .. } => Severity::Normal,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for application-wide events
///
/// Backed by tokio::broadcast: non-blocking publish, multiple
/// concurrent subscribers, automatic cleanup when subscribers drop.
/// Feeds the ops SSE stream and tests; live sessions are served by the
/// notification hub, not the bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, logging at debug when nobody is listening
    pub fn emit(&self, event: FlowEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            tracing::debug!(event_type, "No subscribers for event");
        }
    }

    /// Emit an event, silently dropping it when nobody is listening
    pub fn emit_lossy(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityRef;

    fn sample_event() -> FlowEvent {
        FlowEvent::ReadingSubmitted {
            reading_id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            slot_id: Uuid::new_v4(),
            reading_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            recorded_by: Uuid::new_v4(),
            alert_level: AlertLevel::Warning,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["type"], "ReadingSubmitted");
        assert_eq!(json["alert_level"], "WARNING");
    }

    #[test]
    fn event_type_matches_tag() {
        let event = sample_event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(sample_event());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "ReadingSubmitted");
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(sample_event());
        bus.emit_lossy(sample_event());
    }

    #[test]
    fn push_message_shed_ranking() {
        let hello = PushMessage::SessionEstablished {
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            heartbeat_interval_secs: 15,
            heartbeat_miss_limit: 3,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            unread_count: 0,
        };
        let badge = PushMessage::UnreadCount { count: 3 };
        let urgent = PushMessage::Notification {
            event: NotificationEvent {
                id: Uuid::new_v4(),
                title: "t".into(),
                message: "m".into(),
                severity: Severity::Urgent,
                entity: EntityRef::Reading(Uuid::new_v4()),
                created_at: chrono::Utc::now(),
            },
        };

        assert_eq!(hello.severity(), Severity::Urgent);
        assert_eq!(badge.severity(), Severity::Normal);
        assert_eq!(urgent.severity(), Severity::Urgent);
    }
}
