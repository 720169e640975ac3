use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tabrelay_protocol::{ReplyFrame, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Hub, HubEvent, PendingRequest};

/// Lifecycle of a pending request. Transitions only move forward; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
	Assigned,
	Forwarded,
	Streaming,
	Completed,
	Failed,
	TimedOut,
	Cancelled,
}

impl RequestState {
	fn rank(self) -> u8 {
		match self {
			RequestState::Assigned => 0,
			RequestState::Forwarded => 1,
			RequestState::Streaming => 2,
			RequestState::Completed
			| RequestState::Failed
			| RequestState::TimedOut
			| RequestState::Cancelled => 3,
		}
	}

	pub fn is_terminal(self) -> bool {
		self.rank() == 3
	}

	/// Whether moving to `next` keeps the lifecycle monotonic. Staying in the same non-terminal
	/// state is allowed.
	pub fn can_advance_to(self, next: RequestState) -> bool {
		!self.is_terminal() && next.rank() >= self.rank()
	}
}

/// Result of a successful [`Hub::assign`].
#[derive(Debug)]
pub struct Assignment {
	pub session_id: String,
	/// Reply frames the session sends for this request, in arrival order. Closes when the
	/// request is released or its session disconnects.
	pub replies: mpsc::UnboundedReceiver<ReplyFrame>,
}

impl Hub {
	/// Binds `request_id` to the first connected session and records it as `Assigned`.
	///
	/// Returns `None` when no session is connected, or when `request_id` is already in flight; the
	/// routing table is left untouched in both cases.
	pub fn assign(&self, request_id: &str) -> Option<Assignment> {
		let (session_id, replies) = {
			let mut state = self.state.lock();
			if state.routing.contains_key(request_id) {
				warn!(target = "tabrelay::hub", request_id, "request id already in flight");
				return None;
			}
			let session_id = state.sessions.keys().next()?.clone();

			let (tx, rx) = mpsc::unbounded_channel();
			state
				.routing
				.insert(request_id.to_string(), session_id.clone());
			state.pending.entry(session_id.clone()).or_default().insert(
				request_id.to_string(),
				PendingRequest {
					request_id: request_id.to_string(),
					session_id: session_id.clone(),
					job_payload: None,
					submitted_at: Instant::now(),
					state: RequestState::Assigned,
					replies: tx,
				},
			);
			(session_id, rx)
		};

		debug!(target = "tabrelay::hub", request_id, session_id = %session_id, "request assigned");
		self.publish(HubEvent::RequestAssigned {
			request_id: request_id.to_string(),
			session_id: session_id.clone(),
		});
		Some(Assignment {
			session_id,
			replies,
		})
	}

	/// Moves a pending request to `next`. Returns `false` when the request is unknown or the
	/// transition would move backwards or leave a terminal state.
	pub fn transition(&self, request_id: &str, next: RequestState) -> bool {
		let mut state = self.state.lock();
		match state.pending_mut(request_id) {
			Some(pending) if pending.state.can_advance_to(next) => {
				pending.state = next;
				true
			}
			Some(pending) => {
				debug!(
					target = "tabrelay::hub",
					request_id,
					from = ?pending.state,
					to = ?next,
					"ignored non-monotonic transition"
				);
				false
			}
			None => false,
		}
	}

	pub fn request_state(&self, request_id: &str) -> Option<RequestState> {
		let mut state = self.state.lock();
		state.pending_mut(request_id).map(|pending| pending.state)
	}

	/// Releases a request: removes it from every pending map and the routing table. Tolerates ids
	/// that are already gone. Returns the final state when the request was still tracked.
	pub fn complete(&self, request_id: &str) -> Option<RequestState> {
		let removed = self.state.lock().remove_request(request_id)?;
		debug!(
			target = "tabrelay::hub",
			request_id,
			state = ?removed.state,
			elapsed_ms = removed.submitted_at.elapsed().as_millis() as u64,
			"request released"
		);
		self.publish(HubEvent::RequestFinished {
			request_id: request_id.to_string(),
			state: removed.state,
		});
		Some(removed.state)
	}

	/// Marks a request `Cancelled`, releases it, and asks its session to stop generating.
	///
	/// The session notice is best effort: it is dropped when the session's queue is full.
	pub fn cancel(&self, request_id: &str) {
		let channel = {
			let mut state = self.state.lock();
			if let Some(pending) = state.pending_mut(request_id) {
				if pending.state.can_advance_to(RequestState::Cancelled) {
					pending.state = RequestState::Cancelled;
				}
			}
			let channel = state
				.routing
				.get(request_id)
				.and_then(|session_id| state.sessions.get(session_id))
				.map(|session| session.channel.clone());
			channel
		};

		if self.complete(request_id).is_none() {
			return;
		}
		let Some(channel) = channel else {
			return;
		};
		let frame = ServerMessage::Cancel {
			request_id: request_id.to_string(),
		};
		match serde_json::to_string(&frame) {
			Ok(text) => {
				if channel.try_send(text).is_err() {
					debug!(target = "tabrelay::hub", request_id, "cancel notice not delivered");
				}
			}
			Err(err) => warn!(target = "tabrelay::hub", error = %err, "failed to encode cancel frame"),
		}
	}

	/// Routing table as `request id -> session id`, sorted by request id.
	pub fn routing_snapshot(&self) -> BTreeMap<String, String> {
		self.state
			.lock()
			.routing
			.iter()
			.map(|(request, session)| (request.clone(), session.clone()))
			.collect()
	}

	pub fn pending_count(&self) -> usize {
		self.state.lock().pending.values().map(|requests| requests.len()).sum()
	}
}
