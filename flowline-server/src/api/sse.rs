//! Server-Sent Events endpoints
//!
//! Two streams: `/notifications/connect` is the per-user notification
//! session (hello frame, notification pushes, unread-count badges),
//! and `/events` is the firehose of domain events off the bus.
//!
//! The session stream drains the connection's queue and parks on its
//! wakeup when empty. A drop guard unregisters the session when the
//! client goes away, so abrupt disconnects clean up without waiting
//! for the heartbeat reaper.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::AppContext;
use crate::notify::NotificationHub;
use crate::store::Authority;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: Uuid,
}

/// Unregisters the session when the SSE stream is dropped
struct SessionGuard {
    hub: Arc<NotificationHub>,
    session_id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.session_id);
    }
}

/// GET /notifications/connect?user_id= - open a notification session
pub async fn connect(
    State(ctx): State<AppContext>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, StatusCode> {
    let baseline = ctx
        .notifications
        .count_unread(query.user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let is_validator = ctx
        .authority
        .has_authority(query.user_id, Authority::ValidateReadings)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let session = ctx.hub.register(query.user_id, is_validator, baseline);
    session.mark_connected();

    let guard = SessionGuard {
        hub: Arc::clone(&ctx.hub),
        session_id: session.session_id(),
    };

    let stream = async_stream::stream! {
        // Moved into the stream so dropping it fires the unregister
        let _guard = guard;

        loop {
            let frames = session.drain();
            if frames.is_empty() {
                if session.is_closed() {
                    break;
                }
                session.wait().await;
                continue;
            }

            for frame in frames {
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        yield Ok::<Event, Infallible>(
                            Event::default().event(frame.frame_type()).data(json),
                        );
                    }
                    Err(e) => warn!("Failed to serialize push frame: {}", e),
                }
            }
        }

        debug!(session_id = %session.session_id(), "Notification stream ended");
    };

    Ok(Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response())
}

/// GET /events - SSE stream of all domain events
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New event-stream client connected");

    let rx = ctx.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // BroadcastStream error (lagged or closed)
                warn!("Event stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
