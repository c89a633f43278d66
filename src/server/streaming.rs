//! SSE (Server-Sent Events) streaming of cache lifecycle events.
//!
//! Converts a broadcast receiver of CacheEvents into an SSE stream; each event
//! is sent as JSON under its own event name.

use axum::response::sse::Event;
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::cache::event::CacheEvent;

/// Convert a cache event receiver into an SSE stream.
///
/// A subscriber that falls behind gets a `lagged` event carrying the number of
/// events it missed, then continues with the newest ones.
pub fn events_to_sse_stream(
    rx: broadcast::Receiver<CacheEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    BroadcastStream::new(rx).map(|item| {
        let event = match item {
            Ok(event) => {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Event::default().event(event.name()).data(data)
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "Event subscriber lagged");
                Event::default().event("lagged").data(skipped.to_string())
            }
        };
        Ok(event)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::EntityKind;
    use crate::cache::event::EventBus;

    fn added(id: &str) -> CacheEvent {
        CacheEvent::EntityAdded {
            kind: EntityKind::Image,
            id: id.into(),
            size_in_bytes: 1,
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_streaming() {
        let bus = EventBus::new(2);
        let stream = events_to_sse_stream(bus.subscribe());
        for id in ["a", "b", "c", "d"] {
            bus.emit(added(id));
        }
        drop(bus);

        // One lagged notice, then the two newest events.
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(Result::is_ok));
    }
}
