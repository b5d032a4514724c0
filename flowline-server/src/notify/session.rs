//! One live notification session
//!
//! A session is one duplex channel to one client: a bounded delivery
//! queue written by the hub and drained by the session's SSE task, a
//! heartbeat deadline refreshed by the client, and a closed flag that
//! ends the stream.
//!
//! Backpressure: when the queue is full the lowest-severity frame goes
//! first (the incoming frame itself when it ranks below everything
//! queued, otherwise the oldest queued frame of the lowest severity).
//! Urgent frames are never shed in favor of Normal/High ones.
//! UnreadCount frames coalesce in place rather than occupying a second
//! slot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use flowline_common::events::PushMessage;

/// Lifecycle of one session connection.
///
/// The server only ever stores Connecting, Connected, and Closed;
/// Reconnecting is the client-observed gap between a lost Connected
/// stream and the next register, and exists here so the protocol's
/// state space is spelled out in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// One live per-user delivery channel
pub struct SessionConnection {
    session_id: Uuid,
    user_id: Uuid,
    is_validator: bool,
    connected_at: DateTime<Utc>,
    capacity: usize,
    state: Mutex<SessionState>,
    last_seen: Mutex<DateTime<Utc>>,
    queue: Mutex<VecDeque<PushMessage>>,
    wakeup: Notify,
    closed: AtomicBool,
}

impl SessionConnection {
    pub fn new(user_id: Uuid, is_validator: bool, capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            is_validator,
            connected_at: now,
            capacity: capacity.max(1),
            state: Mutex::new(SessionState::Connecting),
            last_seen: Mutex::new(now),
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn is_validator(&self) -> bool {
        self.is_validator
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state lock poisoned")
    }

    /// The session's SSE stream has started serving
    pub fn mark_connected(&self) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        if *state == SessionState::Connecting {
            *state = SessionState::Connected;
        }
    }

    /// Enqueue a frame for delivery, shedding under backpressure
    pub fn push(&self, message: PushMessage) {
        if self.is_closed() {
            return;
        }

        let mut queue = self.queue.lock().expect("session queue lock poisoned");

        // Badge updates coalesce: replace a queued count in place
        if let PushMessage::UnreadCount { .. } = message {
            if let Some(slot) = queue
                .iter_mut()
                .find(|m| matches!(m, PushMessage::UnreadCount { .. }))
            {
                *slot = message;
                drop(queue);
                self.wakeup.notify_one();
                return;
            }
        }

        if queue.len() >= self.capacity {
            let incoming_severity = message.severity();
            let (shed_index, shed_severity) = queue
                .iter()
                .enumerate()
                .min_by_key(|(_, m)| m.severity())
                .map(|(i, m)| (i, m.severity()))
                .expect("full queue has a minimum");

            if incoming_severity < shed_severity {
                // Everything queued outranks the incoming frame
                warn!(
                    session_id = %self.session_id,
                    severity = ?incoming_severity,
                    "Session queue full, dropping incoming frame"
                );
                return;
            }

            warn!(
                session_id = %self.session_id,
                shed_severity = ?shed_severity,
                incoming_severity = ?incoming_severity,
                "Session queue full, shedding oldest lowest-severity frame"
            );
            queue.remove(shed_index);
        }

        queue.push_back(message);
        drop(queue);
        self.wakeup.notify_one();
    }

    /// Take every queued frame, in delivery order
    pub fn drain(&self) -> Vec<PushMessage> {
        let mut queue = self.queue.lock().expect("session queue lock poisoned");
        queue.drain(..).collect()
    }

    /// Number of queued frames
    pub fn queue_len(&self) -> usize {
        self.queue.lock().expect("session queue lock poisoned").len()
    }

    /// Wait until a frame is queued or the session closes
    pub async fn wait(&self) {
        self.wakeup.notified().await;
    }

    /// Refresh the heartbeat deadline
    pub fn touch(&self) {
        let mut last_seen = self.last_seen.lock().expect("session last_seen lock poisoned");
        *last_seen = Utc::now();
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.lock().expect("session last_seen lock poisoned")
    }

    /// Close the session; pending deliveries are abandoned
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut state = self.state.lock().expect("session state lock poisoned");
            *state = SessionState::Closed;
            drop(state);
            debug!(session_id = %self.session_id, user_id = %self.user_id, "Session closed");
            // Wake every waiter so the SSE task observes the close
            self.wakeup.notify_waiters();
            self.wakeup.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowline_common::model::{EntityRef, NotificationEvent, Severity};

    fn notification(severity: Severity, title: &str) -> PushMessage {
        PushMessage::Notification {
            event: NotificationEvent {
                id: Uuid::new_v4(),
                title: title.to_string(),
                message: "m".to_string(),
                severity,
                entity: EntityRef::Reading(Uuid::new_v4()),
                created_at: Utc::now(),
            },
        }
    }

    fn titles(messages: &[PushMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                PushMessage::Notification { event } => Some(event.title.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn push_and_drain_preserve_order() {
        let session = SessionConnection::new(Uuid::new_v4(), false, 8);
        session.push(notification(Severity::Normal, "a"));
        session.push(notification(Severity::High, "b"));
        session.push(notification(Severity::Normal, "c"));

        assert_eq!(titles(&session.drain()), vec!["a", "b", "c"]);
        assert!(session.drain().is_empty());
    }

    #[test]
    fn overflow_sheds_oldest_lowest_severity_first() {
        let session = SessionConnection::new(Uuid::new_v4(), false, 3);
        session.push(notification(Severity::Normal, "old-normal"));
        session.push(notification(Severity::Urgent, "urgent"));
        session.push(notification(Severity::Normal, "new-normal"));

        // Queue full; an Urgent arrival sheds the oldest Normal
        session.push(notification(Severity::Urgent, "late-urgent"));
        assert_eq!(
            titles(&session.drain()),
            vec!["urgent", "new-normal", "late-urgent"]
        );
    }

    #[test]
    fn urgent_frames_are_never_shed_for_lower_severities() {
        let session = SessionConnection::new(Uuid::new_v4(), false, 2);
        session.push(notification(Severity::Urgent, "u1"));
        session.push(notification(Severity::Urgent, "u2"));

        // Incoming Normal ranks below everything queued: it is dropped
        session.push(notification(Severity::Normal, "n1"));
        assert_eq!(titles(&session.drain()), vec!["u1", "u2"]);
    }

    #[test]
    fn unread_counts_coalesce_in_place() {
        let session = SessionConnection::new(Uuid::new_v4(), false, 8);
        session.push(PushMessage::UnreadCount { count: 1 });
        session.push(notification(Severity::Normal, "a"));
        session.push(PushMessage::UnreadCount { count: 5 });

        let drained = session.drain();
        assert_eq!(drained.len(), 2);
        match &drained[0] {
            PushMessage::UnreadCount { count } => assert_eq!(*count, 5),
            other => panic!("expected coalesced UnreadCount first, got {other:?}"),
        }
    }

    #[test]
    fn closed_session_discards_pushes() {
        let session = SessionConnection::new(Uuid::new_v4(), false, 8);
        session.close();
        assert!(session.is_closed());
        assert_eq!(session.state(), SessionState::Closed);

        session.push(notification(Severity::Urgent, "late"));
        assert!(session.drain().is_empty());
    }

    #[test]
    fn touch_advances_last_seen() {
        let session = SessionConnection::new(Uuid::new_v4(), false, 8);
        let before = session.last_seen();
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch();
        assert!(session.last_seen() > before);
    }

    #[tokio::test]
    async fn wait_wakes_on_push() {
        let session = std::sync::Arc::new(SessionConnection::new(Uuid::new_v4(), false, 8));
        let waiter = std::sync::Arc::clone(&session);
        let handle = tokio::spawn(async move {
            waiter.wait().await;
            waiter.drain().len()
        });

        // Give the waiter a chance to park
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        session.push(notification(Severity::Normal, "wake"));
        assert_eq!(handle.await.unwrap(), 1);
    }
}
