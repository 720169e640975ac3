//! Session hub: registry of connected execution sessions, request correlation and duplex
//! forwarding.
//!
//! All hub state (session channels, routing table, pending requests) sits behind a single
//! [`parking_lot::Mutex`]. The lock is only taken for short synchronous sections and is never held
//! across an `.await`, which is what allows [`Hub::cancel`] to be called from `Drop`.
//!
//! The hub is split by concern:
//!
//! - [`registry`]: `register`, `unregister`, `has_any`, `list`
//! - [`correlator`]: `assign`, `transition`, `complete`, `cancel`
//! - [`forwarder`]: `forward` of jobs, `deliver` of reply frames, `notify`
//!
//! Observers subscribe to [`HubEvent`]s through a broadcast channel; a lagging or absent listener
//! never blocks the hub.

mod correlator;
mod forwarder;
mod registry;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tabrelay_protocol::ReplyFrame;
use tokio::sync::{broadcast, mpsc};

pub use correlator::{Assignment, RequestState};

/// Outbound frames buffered per session before `forward` has to wait for capacity.
pub const SESSION_CHANNEL_CAPACITY: usize = 64;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Sender half of a session's outbound frame queue. Frames are serialized JSON text.
pub type SessionChannel = mpsc::Sender<String>;

/// A connected execution session.
#[derive(Debug)]
pub struct ExecutionSession {
	pub id: String,
	pub channel: SessionChannel,
	pub connected_at: SystemTime,
}

/// An in-flight request owned by the correlator.
#[derive(Debug)]
pub struct PendingRequest {
	pub request_id: String,
	pub session_id: String,
	/// Job frame as forwarded, set once the send succeeded.
	pub job_payload: Option<Value>,
	pub submitted_at: Instant,
	pub state: RequestState,
	replies: mpsc::UnboundedSender<ReplyFrame>,
}

/// Notifications published by the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
	SessionConnected {
		session_id: String,
	},
	SessionDisconnected {
		session_id: String,
		dropped_requests: usize,
	},
	RequestAssigned {
		request_id: String,
		session_id: String,
	},
	RequestForwarded {
		request_id: String,
		session_id: String,
	},
	RequestFinished {
		request_id: String,
		state: RequestState,
	},
}

/// Point-in-time view of one session for the management API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionInfo {
	pub session_id: String,
	/// Unix epoch seconds.
	pub connected_at: u64,
	pub pending_requests: usize,
}

#[derive(Debug, Default)]
struct HubState {
	sessions: HashMap<String, ExecutionSession>,
	/// request id to session id.
	routing: HashMap<String, String>,
	/// session id to its in-flight requests.
	pending: HashMap<String, HashMap<String, PendingRequest>>,
}

impl HubState {
	fn pending_mut(&mut self, request_id: &str) -> Option<&mut PendingRequest> {
		let session_id = self.routing.get(request_id)?;
		self.pending.get_mut(session_id)?.get_mut(request_id)
	}

	/// Removes a request from the routing table and every pending map.
	fn remove_request(&mut self, request_id: &str) -> Option<PendingRequest> {
		self.routing.remove(request_id);
		let mut removed = None;
		for requests in self.pending.values_mut() {
			if let Some(pending) = requests.remove(request_id) {
				removed = Some(pending);
			}
		}
		removed
	}
}

/// Shared handle to the session hub. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Hub {
	state: Arc<Mutex<HubState>>,
	events: broadcast::Sender<HubEvent>,
}

impl Default for Hub {
	fn default() -> Self {
		Self::new()
	}
}

impl Hub {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
		Self {
			state: Arc::new(Mutex::new(HubState::default())),
			events,
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
		self.events.subscribe()
	}

	fn publish(&self, event: HubEvent) {
		// No subscribers is not an error.
		let _ = self.events.send(event);
	}

	/// Fresh session id of the form `client_<8 hex>`.
	pub fn new_session_id() -> String {
		format!("client_{}", short_id())
	}

	/// Fresh request id of the form `req_<8 hex>`.
	pub fn new_request_id() -> String {
		format!("req_{}", short_id())
	}

	/// Snapshot of every connected session.
	pub fn sessions(&self) -> Vec<SessionInfo> {
		let state = self.state.lock();
		let mut sessions: Vec<_> = state
			.sessions
			.values()
			.map(|session| SessionInfo {
				session_id: session.id.clone(),
				connected_at: crate::unix_secs(session.connected_at),
				pending_requests: state.pending.get(&session.id).map_or(0, HashMap::len),
			})
			.collect();
		sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
		sessions
	}
}

fn short_id() -> String {
	let simple = uuid::Uuid::new_v4().simple().to_string();
	simple[..8].to_string()
}
