//! Live notification delivery
//!
//! The hub owns the registry of per-user sessions; each session owns a
//! bounded delivery queue drained by its SSE stream. Reconnection is a
//! client concern governed by the policy in `backoff`, serialized into
//! every session's hello frame.

pub mod backoff;
pub mod hub;
pub mod session;

pub use backoff::ReconnectPolicy;
pub use hub::{HubSettings, NotificationHub};
pub use session::{SessionConnection, SessionState};
