//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE stream construction for ABTGS services.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::AbtgsEvent;

/// Heartbeat interval for all SSE streams
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Forward broadcast events to an SSE client
///
/// Sends an initial `ConnectionStatus` event, then every event accepted by
/// `filter`, with a comment heartbeat when the bus is quiet. Lagged receivers
/// skip the dropped events and keep streaming.
pub fn event_sse_stream<F>(
    service_name: &'static str,
    mut rx: broadcast::Receiver<AbtgsEvent>,
    filter: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: Fn(&AbtgsEvent) -> bool + Send + 'static,
{
    info!("New SSE client connected to {} events", service_name);

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }
                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if !filter(&event) {
                                continue;
                            }
                            let event_type = event.event_type();
                            match serde_json::to_string(&event) {
                                Ok(json) => yield Ok(Event::default().event(event_type).data(json)),
                                Err(e) => warn!("SSE: Failed to serialize event {}: {}", event_type, e),
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("SSE: {} client lagged, skipped {} events", service_name, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("SSE: {} event bus closed", service_name);
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
