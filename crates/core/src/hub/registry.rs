use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use tracing::{info, warn};

use super::{ExecutionSession, Hub, HubEvent, SessionChannel};

impl Hub {
	/// Registers a session under `session_id`. An existing session with the same id is dropped
	/// first, along with its routing rows and pending requests.
	pub fn register(&self, session_id: impl Into<String>, channel: SessionChannel) {
		let session_id = session_id.into();
		let replaced = {
			let mut state = self.state.lock();
			let replaced = state.sessions.contains_key(&session_id);
			if replaced {
				state.routing.retain(|_, owner| owner != &session_id);
				state.pending.remove(&session_id);
			}
			state.sessions.insert(
				session_id.clone(),
				ExecutionSession {
					id: session_id.clone(),
					channel,
					connected_at: SystemTime::now(),
				},
			);
			state.pending.entry(session_id.clone()).or_insert_with(HashMap::new);
			replaced
		};

		if replaced {
			warn!(target = "tabrelay::hub", session_id = %session_id, "replaced existing session");
		}
		info!(target = "tabrelay::hub", session_id = %session_id, "session registered");
		self.publish(HubEvent::SessionConnected { session_id });
	}

	/// Removes a session, every routing row pointing at it and all of its pending requests.
	///
	/// Dropping the pending requests closes their reply channels, so waiting callers observe the
	/// disconnect. Returns `false` when the session was already gone.
	pub fn unregister(&self, session_id: &str) -> bool {
		self.remove_session(session_id, None)
	}

	/// Like [`Hub::unregister`], but only while `session_id` is still served by `channel`.
	///
	/// A session re-registered under the same id in the meantime is left alone.
	pub(crate) fn unregister_channel(&self, session_id: &str, channel: &SessionChannel) -> bool {
		self.remove_session(session_id, Some(channel))
	}

	fn remove_session(&self, session_id: &str, expected: Option<&SessionChannel>) -> bool {
		let dropped = {
			let mut state = self.state.lock();
			let current = match state.sessions.get(session_id) {
				Some(session) => expected.is_none_or(|channel| session.channel.same_channel(channel)),
				None => false,
			};
			if !current {
				return false;
			}
			state.sessions.remove(session_id);
			state.routing.retain(|_, owner| owner != session_id);
			state.pending.remove(session_id).map_or(0, |requests| requests.len())
		};

		info!(
			target = "tabrelay::hub",
			session_id,
			dropped_requests = dropped,
			"session unregistered"
		);
		self.publish(HubEvent::SessionDisconnected {
			session_id: session_id.to_string(),
			dropped_requests: dropped,
		});
		true
	}

	pub fn has_any(&self) -> bool {
		!self.state.lock().sessions.is_empty()
	}

	pub fn list(&self) -> HashSet<String> {
		self.state.lock().sessions.keys().cloned().collect()
	}

	pub fn session_count(&self) -> usize {
		self.state.lock().sessions.len()
	}

	pub fn is_registered(&self, session_id: &str) -> bool {
		self.state.lock().sessions.contains_key(session_id)
	}
}
