//! Notification hub
//!
//! In-memory registry of live per-user sessions with role-scoped
//! fan-out and a per-user unread-count cache. The API is synchronous
//! on purpose: `publish` takes a short lock, enqueues, and returns,
//! performing no I/O and no awaits, so a slow or disconnected client
//! can never stall a workflow transition.
//!
//! Live delivery is best effort and at-most-once per session. The
//! durable notification store is the system of record; a user with no
//! live sessions simply catches up from their unread baseline on the
//! next connect.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowline_common::events::{Audience, EventBus, FlowEvent, PushMessage};
use flowline_common::model::NotificationEvent;

use super::backoff::ReconnectPolicy;
use super::session::SessionConnection;

/// Hub configuration, resolved from runtime settings at startup
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_miss_limit: u32,
    pub session_queue_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            heartbeat_miss_limit: 3,
            session_queue_capacity: 64,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<Uuid, Arc<SessionConnection>>,
    /// Cached unread count per user; seeded from the durable baseline
    /// at register and self-healing on reconnect
    unread: HashMap<Uuid, u64>,
}

/// Registry and fan-out for live notification sessions
pub struct NotificationHub {
    inner: RwLock<HubInner>,
    settings: HubSettings,
    bus: EventBus,
}

impl NotificationHub {
    pub fn new(settings: HubSettings, bus: EventBus) -> Self {
        Self {
            inner: RwLock::new(HubInner::default()),
            settings,
            bus,
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Register a new session for a user.
    ///
    /// Multiple concurrent sessions per user are supported; every
    /// reconnect lands here as a brand-new session. The first queued
    /// frame is the hello carrying the session id, heartbeat
    /// parameters, reconnect policy, and the unread baseline.
    pub fn register(
        &self,
        user_id: Uuid,
        is_validator: bool,
        unread_baseline: u64,
    ) -> Arc<SessionConnection> {
        let session = Arc::new(SessionConnection::new(
            user_id,
            is_validator,
            self.settings.session_queue_capacity,
        ));

        session.push(PushMessage::SessionEstablished {
            session_id: session.session_id(),
            user_id,
            heartbeat_interval_secs: self.settings.heartbeat_interval_secs,
            heartbeat_miss_limit: self.settings.heartbeat_miss_limit,
            reconnect_base_delay_ms: self.settings.reconnect.base_delay_ms,
            reconnect_max_delay_ms: self.settings.reconnect.max_delay_ms,
            unread_count: unread_baseline,
        });

        {
            let mut inner = self.inner.write().expect("hub lock poisoned");
            inner.sessions.insert(session.session_id(), Arc::clone(&session));
            inner.unread.insert(user_id, unread_baseline);
        }

        info!(
            session_id = %session.session_id(),
            user_id = %user_id,
            is_validator,
            "Notification session registered"
        );
        self.bus.emit_lossy(FlowEvent::SessionOpened {
            session_id: session.session_id(),
            user_id,
            timestamp: Utc::now(),
        });

        session
    }

    /// Remove and close a session. Idempotent: the SSE drop guard, the
    /// reaper, and explicit closes may all race here.
    pub fn unregister(&self, session_id: Uuid) {
        self.close_session(session_id, "disconnected");
    }

    fn close_session(&self, session_id: Uuid, reason: &str) {
        let removed = {
            let mut inner = self.inner.write().expect("hub lock poisoned");
            inner.sessions.remove(&session_id)
        };

        if let Some(session) = removed {
            session.close();
            debug!(session_id = %session_id, reason, "Notification session unregistered");
            self.bus.emit_lossy(FlowEvent::SessionClosed {
                session_id,
                user_id: session.user_id(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Fan an event out to every live session in the audience.
    ///
    /// Enqueue-and-wake only; failures to deliver to a session are a
    /// session problem (shed, closed), never the publisher's.
    pub fn publish(&self, event: &NotificationEvent, audience: Audience) {
        let mut inner = self.inner.write().expect("hub lock poisoned");

        // Group matching sessions per user so the unread count bumps
        // once per user, not once per tab
        let mut per_user: HashMap<Uuid, Vec<Arc<SessionConnection>>> = HashMap::new();
        for session in inner.sessions.values() {
            let matches = match audience {
                Audience::Validators => session.is_validator(),
                Audience::User(user_id) => session.user_id() == user_id,
            };
            if matches && !session.is_closed() {
                per_user
                    .entry(session.user_id())
                    .or_default()
                    .push(Arc::clone(session));
            }
        }

        if per_user.is_empty() {
            // Nobody live: the durable store already has the event
            debug!(event_id = %event.id, "No live sessions for audience, skipping push");
            return;
        }

        for (user_id, sessions) in per_user {
            let count = inner.unread.entry(user_id).or_insert(0);
            *count += 1;
            let count = *count;
            for session in sessions {
                session.push(PushMessage::Notification {
                    event: event.clone(),
                });
                session.push(PushMessage::UnreadCount { count });
            }
        }
    }

    /// Set a user's cached unread count and push badge updates to
    /// every live session (used after mark-read)
    pub fn push_unread(&self, user_id: Uuid, count: u64) {
        let mut inner = self.inner.write().expect("hub lock poisoned");
        inner.unread.insert(user_id, count);
        for session in inner.sessions.values() {
            if session.user_id() == user_id && !session.is_closed() {
                session.push(PushMessage::UnreadCount { count });
            }
        }
    }

    /// Heartbeat: refresh a session's liveness deadline.
    /// Returns false for an unknown session.
    pub fn touch(&self, session_id: Uuid) -> bool {
        let inner = self.inner.read().expect("hub lock poisoned");
        match inner.sessions.get(&session_id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.inner.read().expect("hub lock poisoned").sessions.len()
    }

    /// All live sessions of one user
    pub fn sessions_for(&self, user_id: Uuid) -> Vec<Arc<SessionConnection>> {
        let inner = self.inner.read().expect("hub lock poisoned");
        inner
            .sessions
            .values()
            .filter(|s| s.user_id() == user_id)
            .cloned()
            .collect()
    }

    /// Close every session quiet past the heartbeat deadline
    fn reap_expired(&self) {
        let deadline = chrono::Duration::seconds(
            (self.settings.heartbeat_interval_secs * self.settings.heartbeat_miss_limit as u64)
                as i64,
        );
        let cutoff = Utc::now() - deadline;

        let expired: Vec<Uuid> = {
            let inner = self.inner.read().expect("hub lock poisoned");
            inner
                .sessions
                .values()
                .filter(|s| s.last_seen() < cutoff)
                .map(|s| s.session_id())
                .collect()
        };

        for session_id in expired {
            warn!(session_id = %session_id, "Session missed heartbeat deadline, closing");
            self.close_session(session_id, "heartbeat timeout");
        }
    }

    /// Spawn the background reaper sweeping once per heartbeat interval
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(hub.settings.heartbeat_interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                hub.reap_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_common::events::PushMessage;
    use flowline_common::model::{EntityRef, Severity};

    fn hub() -> NotificationHub {
        NotificationHub::new(HubSettings::default(), EventBus::new(16))
    }

    fn event(severity: Severity) -> NotificationEvent {
        NotificationEvent {
            id: Uuid::new_v4(),
            title: "Reading submitted".into(),
            message: "m".into(),
            severity,
            entity: EntityRef::Reading(Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }

    fn notification_titles(messages: &[PushMessage]) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, PushMessage::Notification { .. }))
            .count()
    }

    #[tokio::test]
    async fn register_queues_hello_frame_first() {
        let hub = hub();
        let session = hub.register(Uuid::new_v4(), true, 7);
        let frames = session.drain();
        match &frames[0] {
            PushMessage::SessionEstablished {
                unread_count,
                heartbeat_interval_secs,
                ..
            } => {
                assert_eq!(*unread_count, 7);
                assert_eq!(*heartbeat_interval_secs, 15);
            }
            other => panic!("expected hello frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validators_audience_reaches_validator_sessions_only() {
        let hub = hub();
        let validator = Uuid::new_v4();
        let operator = Uuid::new_v4();

        let validator_tab_a = hub.register(validator, true, 0);
        let validator_tab_b = hub.register(validator, true, 0);
        let operator_session = hub.register(operator, false, 0);
        validator_tab_a.drain();
        validator_tab_b.drain();
        operator_session.drain();

        hub.publish(&event(Severity::High), Audience::Validators);

        assert_eq!(notification_titles(&validator_tab_a.drain()), 1);
        assert_eq!(notification_titles(&validator_tab_b.drain()), 1);
        assert_eq!(notification_titles(&operator_session.drain()), 0);
    }

    #[tokio::test]
    async fn user_audience_reaches_that_user_only() {
        let hub = hub();
        let recorder = Uuid::new_v4();
        let other = Uuid::new_v4();

        let recorder_session = hub.register(recorder, false, 0);
        let other_session = hub.register(other, true, 0);
        recorder_session.drain();
        other_session.drain();

        hub.publish(&event(Severity::Normal), Audience::User(recorder));

        assert_eq!(notification_titles(&recorder_session.drain()), 1);
        assert_eq!(notification_titles(&other_session.drain()), 0);
    }

    #[tokio::test]
    async fn publish_to_offline_user_is_a_noop() {
        let hub = hub();
        // No sessions registered at all
        hub.publish(&event(Severity::Urgent), Audience::User(Uuid::new_v4()));
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn unread_count_bumps_once_per_user_across_tabs() {
        let hub = hub();
        let validator = Uuid::new_v4();
        let tab_a = hub.register(validator, true, 0);
        let tab_b = hub.register(validator, true, 0);
        tab_a.drain();
        tab_b.drain();

        hub.publish(&event(Severity::Normal), Audience::Validators);
        hub.publish(&event(Severity::Normal), Audience::Validators);

        // Both tabs end on the same coalesced count: 2, not 4
        let last_count = |frames: Vec<PushMessage>| {
            frames
                .into_iter()
                .filter_map(|m| match m {
                    PushMessage::UnreadCount { count } => Some(count),
                    _ => None,
                })
                .last()
        };
        assert_eq!(last_count(tab_a.drain()), Some(2));
        assert_eq!(last_count(tab_b.drain()), Some(2));
    }

    #[tokio::test]
    async fn touch_refreshes_known_sessions_only() {
        let hub = hub();
        let session = hub.register(Uuid::new_v4(), false, 0);
        assert!(hub.touch(session.session_id()));
        assert!(!hub.touch(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_closes_the_session() {
        let hub = hub();
        let session = hub.register(Uuid::new_v4(), false, 0);
        let id = session.session_id();

        hub.unregister(id);
        assert!(session.is_closed());
        assert_eq!(hub.session_count(), 0);
        hub.unregister(id); // second call is harmless
    }

    #[tokio::test]
    async fn push_unread_updates_every_live_session_of_the_user() {
        let hub = hub();
        let user = Uuid::new_v4();
        let tab_a = hub.register(user, false, 3);
        let tab_b = hub.register(user, false, 3);
        tab_a.drain();
        tab_b.drain();

        hub.push_unread(user, 0);
        for tab in [&tab_a, &tab_b] {
            let frames = tab.drain();
            assert!(frames
                .iter()
                .any(|m| matches!(m, PushMessage::UnreadCount { count: 0 })));
        }
    }

    #[tokio::test]
    async fn reaper_closes_quiet_sessions() {
        let bus = EventBus::new(16);
        let hub = NotificationHub::new(
            HubSettings {
                heartbeat_interval_secs: 0,
                heartbeat_miss_limit: 0,
                ..HubSettings::default()
            },
            bus,
        );
        let session = hub.register(Uuid::new_v4(), false, 0);
        // interval * miss_limit == 0: any session is past the deadline
        hub.reap_expired();
        assert!(session.is_closed());
        assert_eq!(hub.session_count(), 0);
    }
}
