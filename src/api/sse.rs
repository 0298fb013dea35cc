use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};

use crate::event::{EventStream, TurnEvent};

/// Stream turn events as SSE. Each event is named after its kind and
/// carries the JSON-encoded event as data.
pub fn sse_response(events: EventStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = events.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &TurnEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({ "type": "turn_ended", "error": { "kind": "internal", "message": e.to_string() } })
            .to_string()
    });
    Event::default().event(event.kind()).data(data)
}
