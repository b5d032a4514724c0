//! Store seams for the workflow core
//!
//! Three collaborator interfaces consumed by the workflow service:
//! readings (with the atomic slot check-and-set), authority lookups,
//! and durable per-recipient notification bookkeeping. The server
//! wires the SQLite implementations; tests wire the in-memory one.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use uuid::Uuid;

use flowline_common::model::{FlowReading, FlowThreshold, NotificationEvent, SlotKey};
use flowline_common::Result;

/// Authorities the workflow core checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authority {
    /// May validate or reject submitted readings
    ValidateReadings,
}

impl Authority {
    /// Canonical storage code
    pub fn as_str(&self) -> &'static str {
        match self {
            Authority::ValidateReadings => "VALIDATE_READINGS",
        }
    }
}

/// Reading persistence with the atomic slot check-and-set
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Load a reading by id
    async fn load(&self, id: Uuid) -> Result<Option<FlowReading>>;

    /// The reading currently occupying a slot, if any
    async fn find_active_in_slot(&self, key: &SlotKey) -> Result<Option<FlowReading>>;

    /// All readings awaiting validation, oldest submission first
    async fn list_pending(&self) -> Result<Vec<FlowReading>>;

    /// Atomic check-and-set commit of a transitioned reading.
    ///
    /// Serialized per [`SlotKey`]. Fails with `Conflict { existing }`
    /// when another slot-occupying reading holds the key, and with
    /// `Conflict { existing: None }` on a version mismatch.
    /// `expected_version` 0 means a fresh insert. The committed
    /// reading's version is `expected_version + 1`.
    async fn commit(&self, reading: FlowReading, expected_version: i64) -> Result<FlowReading>;

    /// The pipeline's active threshold configuration, if any
    async fn active_threshold(&self, pipeline_id: Uuid) -> Result<Option<FlowThreshold>>;

    /// Insert or replace a pipeline's threshold configuration.
    /// Activating a threshold deactivates any previous active one.
    async fn upsert_threshold(&self, threshold: FlowThreshold) -> Result<()>;
}

/// Authority lookups against the external directory
#[async_trait]
pub trait AuthorityProvider: Send + Sync {
    /// Whether a user holds an authority
    async fn has_authority(&self, user_id: Uuid, authority: Authority) -> Result<bool>;

    /// All users holding an authority (notification fan-out targets)
    async fn holders(&self, authority: Authority) -> Result<Vec<Uuid>>;
}

/// Durable per-recipient notification bookkeeping
///
/// The system of record for delivery: live push is an optimization on
/// top of this store, never a replacement for it.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Record an event for one recipient
    async fn append(&self, recipient: Uuid, event: &NotificationEvent) -> Result<()>;

    /// A recipient's unread events, oldest first
    async fn list_unread(&self, recipient: Uuid) -> Result<Vec<NotificationEvent>>;

    /// A recipient's unread count
    async fn count_unread(&self, recipient: Uuid) -> Result<u64>;

    /// Mark one event read. Returns false for an unknown or foreign
    /// event id; marking an already-read event again is a no-op true.
    async fn mark_read(&self, recipient: Uuid, event_id: Uuid) -> Result<bool>;
}
