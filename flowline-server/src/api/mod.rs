//! REST/SSE API for flowline-server
//!
//! Authentication and session issuance are upstream collaborators; the
//! handlers trust the user ids presented in requests.

pub mod handlers;
pub mod sse;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use flowline_common::events::EventBus;

use crate::notify::NotificationHub;
use crate::store::{AuthorityProvider, NotificationStore};
use crate::workflow::WorkflowService;

/// Shared application context passed to all handlers
///
/// AppContext implements Clone, which gives `FromRef<AppContext>` for
/// free via Axum's blanket implementation.
#[derive(Clone)]
pub struct AppContext {
    pub service: Arc<WorkflowService>,
    pub hub: Arc<NotificationHub>,
    pub bus: EventBus,
    pub notifications: Arc<dyn NotificationStore>,
    pub authority: Arc<dyn AuthorityProvider>,
    pub pool: SqlitePool,
}

/// Create the API router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health / build info
        .route("/health", get(handlers::health))
        // Reading workflow
        .route("/readings/draft", post(handlers::save_draft))
        .route("/readings/submit", post(handlers::submit))
        .route("/readings/pending", get(handlers::list_pending))
        .route("/readings/:id", get(handlers::get_reading))
        .route("/readings/:id/validate", post(handlers::validate))
        .route("/readings/:id/reject", post(handlers::reject))
        // Reference data
        .route("/slots", get(handlers::list_slots))
        // Notification sessions
        .route("/notifications/connect", get(sse::connect))
        .route(
            "/notifications/sessions/:id/heartbeat",
            post(handlers::heartbeat),
        )
        .route("/notifications/unread", get(handlers::unread))
        .route("/notifications/:event_id/read", post(handlers::mark_read))
        // Ops event stream
        .route("/events", get(sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
