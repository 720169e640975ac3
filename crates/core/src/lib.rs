//! tabrelay: relays OpenAI-style chat completions to browser-resident execution sessions.
//!
//! The [`Relay`] owns a [`Hub`] of connected sessions. Each call is validated, bound to one
//! session, forwarded as a job frame, and its reply lines are decoded and assembled into chunks
//! (streaming) or a single response (buffered), under a per-request deadline.
//!
//! ```ignore
//! let relay = Relay::new(Settings::load(None)?);
//! let response = relay.complete(&request).await?;
//! ```

pub mod assembler;
pub mod catalog;
pub mod decoder;
pub mod error;
pub mod hub;
pub mod relay;
pub mod settings;
pub mod shaping;

use std::time::{SystemTime, UNIX_EPOCH};

pub use assembler::{Assembled, AssemblyMode, ResponseAssembler};
pub use catalog::{ModelCatalog, ModelSpec};
pub use decoder::{FinishReason, StreamDecoder, StreamEvent, StreamState};
pub use error::{RelayError, Result};
pub use hub::{Hub, HubEvent, RequestState, SessionInfo};
pub use relay::{Relay, RelayCall};
pub use settings::{EndpointOverride, Settings, SettingsError};

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
	unix_secs(SystemTime::now())
}

/// Seconds since the Unix epoch; zero for times before it.
pub fn unix_secs(time: SystemTime) -> u64 {
	time.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn unix_secs_counts_from_the_epoch() {
		assert_eq!(unix_secs(UNIX_EPOCH + Duration::from_secs(42)), 42);
		assert_eq!(unix_secs(UNIX_EPOCH - Duration::from_secs(1)), 0);
	}
}
