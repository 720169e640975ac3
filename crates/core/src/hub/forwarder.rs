use serde::Serialize;
use tabrelay_protocol::{JobEnvelope, ServerMessage, SessionReply};
use tracing::{debug, warn};

use super::{Hub, HubEvent, RequestState};

impl Hub {
	/// Sends the job for an assigned request to its session.
	///
	/// Returns `false` when the request has no assignment, the session has no channel, or the send
	/// fails. A closed channel means the session is gone, so it is unregistered before returning.
	/// Waits for queue capacity without holding the hub lock.
	pub async fn forward<P: Serialize>(&self, request_id: &str, payload: &P) -> bool {
		let target = {
			let state = self.state.lock();
			state.routing.get(request_id).and_then(|session_id| {
				state
					.sessions
					.get(session_id)
					.map(|session| (session_id.clone(), session.channel.clone()))
			})
		};
		let Some((session_id, channel)) = target else {
			warn!(target = "tabrelay::hub", request_id, "forward without a live assignment");
			return false;
		};

		let envelope = JobEnvelope {
			request_id: request_id.to_string(),
			job: payload,
		};
		let (frame, text) = match serde_json::to_value(&envelope)
			.and_then(|value| serde_json::to_string(&value).map(|text| (value, text)))
		{
			Ok(encoded) => encoded,
			Err(err) => {
				warn!(target = "tabrelay::hub", request_id, error = %err, "failed to encode job");
				return false;
			}
		};

		if channel.send(text).await.is_err() {
			warn!(
				target = "tabrelay::hub",
				request_id,
				session_id = %session_id,
				"session channel closed, dropping session"
			);
			self.unregister_channel(&session_id, &channel);
			return false;
		}

		{
			let mut state = self.state.lock();
			if let Some(pending) = state.pending_mut(request_id) {
				pending.job_payload = Some(frame);
				if pending.state.can_advance_to(RequestState::Forwarded) {
					pending.state = RequestState::Forwarded;
				}
			}
		}
		debug!(target = "tabrelay::hub", request_id, session_id = %session_id, "job forwarded");
		self.publish(HubEvent::RequestForwarded {
			request_id: request_id.to_string(),
			session_id,
		});
		true
	}

	/// Routes a reply from `session_id` to the waiting request.
	///
	/// Only accepted when the routing table maps the request to that same session. Returns
	/// `false` for replies to unknown, released or foreign requests.
	pub fn deliver(&self, session_id: &str, reply: SessionReply) -> bool {
		let replies = {
			let mut state = self.state.lock();
			if state.routing.get(&reply.request_id).map(String::as_str) != Some(session_id) {
				None
			} else {
				state
					.pending_mut(&reply.request_id)
					.map(|pending| pending.replies.clone())
			}
		};
		let Some(replies) = replies else {
			debug!(
				target = "tabrelay::hub",
				session_id,
				request_id = %reply.request_id,
				"reply for a request not routed to this session"
			);
			return false;
		};

		for frame in reply.into_frames() {
			if replies.send(frame).is_err() {
				return false;
			}
		}
		true
	}

	/// Sends a control frame to a session without waiting. Returns `false` when the session is
	/// unknown or its queue is full or closed.
	pub fn notify(&self, session_id: &str, message: &ServerMessage) -> bool {
		let channel = {
			let state = self.state.lock();
			state
				.sessions
				.get(session_id)
				.map(|session| session.channel.clone())
		};
		let Some(channel) = channel else {
			return false;
		};
		match serde_json::to_string(message) {
			Ok(text) => channel.try_send(text).is_ok(),
			Err(err) => {
				warn!(target = "tabrelay::hub", error = %err, "failed to encode control frame");
				false
			}
		}
	}
}
