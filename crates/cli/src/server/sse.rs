use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tabrelay_protocol::SSE_DONE;
use tracing::warn;

/// Create an SSE response from a stream of JSON-serializable values.
///
/// Each item is serialized and sent as a `data:` event. A final `[DONE]` event follows the
/// last item.
pub fn sse_response<S, T>(items: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
	S: Stream<Item = T> + Send + 'static,
	T: Serialize,
{
	let events = items
		.filter_map(|item| future::ready(format_sse_data(&item)))
		.chain(stream::once(future::ready(SSE_DONE.to_string())))
		.map(|data| Ok(Event::default().data(data)));

	Sse::new(events).keep_alive(KeepAlive::default())
}

/// Serialize one SSE payload. Unserializable items are logged and skipped.
pub fn format_sse_data<T: Serialize>(value: &T) -> Option<String> {
	match serde_json::to_string(value) {
		Ok(data) => Some(data),
		Err(err) => {
			warn!(target = "tabrelay", error = %err, "dropping unserializable stream item");
			None
		}
	}
}
