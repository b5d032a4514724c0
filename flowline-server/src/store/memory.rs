//! In-memory store implementation
//!
//! Implements all three store seams behind a single async Mutex. One
//! lock is deliberate: `commit` must observe the slot occupancy and the
//! reading's stored version in the same critical section, which is the
//! per-SlotKey serialization the one-active-reading invariant requires.
//!
//! Used by unit and integration tests, and available for development
//! runs without a database file.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use flowline_common::model::{FlowReading, FlowThreshold, NotificationEvent, SlotKey};
use flowline_common::{Error, Result};

use super::{Authority, AuthorityProvider, NotificationStore, ReadingStore};

#[derive(Debug, Clone)]
struct StoredNotification {
    event: NotificationEvent,
    is_read: bool,
    #[allow(dead_code)]
    read_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemoryInner {
    readings: HashMap<Uuid, FlowReading>,
    thresholds: HashMap<Uuid, FlowThreshold>,
    authorities: HashMap<Uuid, HashSet<Authority>>,
    notifications: HashMap<Uuid, Vec<StoredNotification>>,
}

/// In-memory implementation of every store seam
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant an authority to a user (test/dev setup)
    pub async fn grant(&self, user_id: Uuid, authority: Authority) {
        let mut inner = self.inner.lock().await;
        inner.authorities.entry(user_id).or_default().insert(authority);
    }

    /// Total stored notifications for a recipient, read or not
    pub async fn notification_count(&self, recipient: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner
            .notifications
            .get(&recipient)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn load(&self, id: Uuid) -> Result<Option<FlowReading>> {
        let inner = self.inner.lock().await;
        Ok(inner.readings.get(&id).cloned())
    }

    async fn find_active_in_slot(&self, key: &SlotKey) -> Result<Option<FlowReading>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .readings
            .values()
            .find(|r| r.slot_key() == *key && r.status.occupies_slot())
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<FlowReading>> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<FlowReading> = inner
            .readings
            .values()
            .filter(|r| r.status == flowline_common::ValidationStatus::Submitted)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.recorded_at);
        Ok(pending)
    }

    async fn commit(&self, reading: FlowReading, expected_version: i64) -> Result<FlowReading> {
        let mut inner = self.inner.lock().await;

        // Slot collision: another reading occupying this key
        if reading.status.occupies_slot() {
            let key = reading.slot_key();
            if let Some(existing) = inner
                .readings
                .values()
                .find(|r| r.id != reading.id && r.slot_key() == key && r.status.occupies_slot())
            {
                return Err(Error::Conflict {
                    existing: Some(existing.id),
                });
            }
        }

        // Version check against the stored row
        match inner.readings.get(&reading.id) {
            Some(stored) if stored.version != expected_version => {
                return Err(Error::Conflict { existing: None });
            }
            None if expected_version != 0 => {
                return Err(Error::Conflict { existing: None });
            }
            _ => {}
        }

        let mut committed = reading;
        committed.version = expected_version + 1;
        inner.readings.insert(committed.id, committed.clone());
        Ok(committed)
    }

    async fn active_threshold(&self, pipeline_id: Uuid) -> Result<Option<FlowThreshold>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .thresholds
            .get(&pipeline_id)
            .filter(|t| t.active)
            .cloned())
    }

    async fn upsert_threshold(&self, threshold: FlowThreshold) -> Result<()> {
        threshold.validate()?;
        let mut inner = self.inner.lock().await;
        inner.thresholds.insert(threshold.pipeline_id, threshold);
        Ok(())
    }
}

#[async_trait]
impl AuthorityProvider for MemoryStore {
    async fn has_authority(&self, user_id: Uuid, authority: Authority) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .authorities
            .get(&user_id)
            .map(|set| set.contains(&authority))
            .unwrap_or(false))
    }

    async fn holders(&self, authority: Authority) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        let mut holders: Vec<Uuid> = inner
            .authorities
            .iter()
            .filter(|(_, set)| set.contains(&authority))
            .map(|(id, _)| *id)
            .collect();
        holders.sort();
        Ok(holders)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn append(&self, recipient: Uuid, event: &NotificationEvent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .notifications
            .entry(recipient)
            .or_default()
            .push(StoredNotification {
                event: event.clone(),
                is_read: false,
                read_at: None,
            });
        Ok(())
    }

    async fn list_unread(&self, recipient: Uuid) -> Result<Vec<NotificationEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .notifications
            .get(&recipient)
            .map(|list| {
                list.iter()
                    .filter(|n| !n.is_read)
                    .map(|n| n.event.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_unread(&self, recipient: Uuid) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .notifications
            .get(&recipient)
            .map(|list| list.iter().filter(|n| !n.is_read).count() as u64)
            .unwrap_or(0))
    }

    async fn mark_read(&self, recipient: Uuid, event_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(list) = inner.notifications.get_mut(&recipient) else {
            return Ok(false);
        };
        let Some(stored) = list.iter_mut().find(|n| n.event.id == event_id) else {
            return Ok(false);
        };
        if !stored.is_read {
            stored.is_read = true;
            stored.read_at = Some(Utc::now());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_common::model::{EntityRef, Measurements, Severity, ValidationStatus};

    fn draft_reading(key: SlotKey) -> FlowReading {
        FlowReading {
            id: Uuid::new_v4(),
            pipeline_id: key.pipeline_id,
            reading_date: key.reading_date,
            slot_id: key.slot_id,
            measurements: Measurements {
                pressure: Some(250.0),
                ..Default::default()
            },
            recorded_by: Uuid::new_v4(),
            recorded_at: None,
            notes: None,
            status: ValidationStatus::Draft,
            validated_by: None,
            validated_at: None,
            rejection_reason: None,
            version: 0,
        }
    }

    fn slot_key() -> SlotKey {
        SlotKey {
            pipeline_id: Uuid::new_v4(),
            reading_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            slot_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn commit_assigns_version_and_round_trips() {
        let store = MemoryStore::new();
        let reading = draft_reading(slot_key());
        let id = reading.id;

        let committed = store.commit(reading, 0).await.unwrap();
        assert_eq!(committed.version, 1);
        assert_eq!(store.load(id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn commit_rejects_second_active_reading_in_slot() {
        let store = MemoryStore::new();
        let key = slot_key();
        let first = store.commit(draft_reading(key), 0).await.unwrap();

        let err = store.commit(draft_reading(key), 0).await.unwrap_err();
        match err {
            Error::Conflict { existing } => assert_eq!(existing, Some(first.id)),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn commit_allows_slot_reuse_after_rejection() {
        let store = MemoryStore::new();
        let key = slot_key();
        let mut first = store.commit(draft_reading(key), 0).await.unwrap();
        first.status = ValidationStatus::Rejected;
        first.rejection_reason = Some("implausible".into());
        store.commit(first, 1).await.unwrap();

        assert!(store.commit(draft_reading(key), 0).await.is_ok());
    }

    #[tokio::test]
    async fn commit_rejects_stale_version() {
        let store = MemoryStore::new();
        let reading = store.commit(draft_reading(slot_key()), 0).await.unwrap();

        let err = store.commit(reading.clone(), 0).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { existing: None }));

        assert!(store.commit(reading, 1).await.is_ok());
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_scoped_to_recipient() {
        let store = MemoryStore::new();
        let recipient = Uuid::new_v4();
        let event = NotificationEvent {
            id: Uuid::new_v4(),
            title: "t".into(),
            message: "m".into(),
            severity: Severity::Normal,
            entity: EntityRef::Reading(Uuid::new_v4()),
            created_at: Utc::now(),
        };
        store.append(recipient, &event).await.unwrap();
        assert_eq!(store.count_unread(recipient).await.unwrap(), 1);

        assert!(store.mark_read(recipient, event.id).await.unwrap());
        assert!(store.mark_read(recipient, event.id).await.unwrap());
        assert_eq!(store.count_unread(recipient).await.unwrap(), 0);

        // Foreign recipient cannot mark it
        assert!(!store.mark_read(Uuid::new_v4(), event.id).await.unwrap());
    }
}
