//! Relay orchestrator: validate, assign, forward, then drive decoding under a deadline.
//!
//! A call moves through `Assigned -> Forwarded -> Streaming` and ends in exactly one of
//! `Completed`, `Failed`, `TimedOut` or `Cancelled`. Dropping a [`RelayCall`] (or the stream or
//! future built on it) before it finished cancels the request in the hub.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tabrelay_protocol::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ReplyFrame};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use crate::assembler::{Assembled, AssemblyMode, ResponseAssembler, prompt_tokens};
use crate::catalog::ModelCatalog;
use crate::decoder::{FinishReason, StreamDecoder, StreamEvent};
use crate::error::{RelayError, Result};
use crate::hub::{Hub, RequestState};
use crate::settings::Settings;
use crate::shaping::{build_job, validate_request};

/// Relay service shared by every inbound call. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Relay {
	hub: Hub,
	settings: Arc<Settings>,
	catalog: Arc<ModelCatalog>,
}

impl Relay {
	pub fn new(settings: Settings) -> Self {
		Self::with_hub(settings, Hub::new())
	}

	pub fn with_hub(settings: Settings, hub: Hub) -> Self {
		let catalog = ModelCatalog::from_settings(&settings);
		Self {
			hub,
			settings: Arc::new(settings),
			catalog: Arc::new(catalog),
		}
	}

	pub fn hub(&self) -> &Hub {
		&self.hub
	}

	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	pub fn catalog(&self) -> &ModelCatalog {
		&self.catalog
	}

	/// Validates the request, binds it to a session and forwards the job.
	///
	/// Session availability is checked before the model lookup, so with no session connected
	/// every well-formed request fails with [`RelayError::NoSessionAvailable`].
	pub async fn start(&self, request: &ChatCompletionRequest, mode: AssemblyMode) -> Result<RelayCall> {
		let timeout = self.settings.request_timeout();
		let deadline = Instant::now() + timeout;

		validate_request(request)?;
		if !self.hub.has_any() {
			return Err(RelayError::NoSessionAvailable);
		}
		let job = build_job(request, &self.catalog, &self.settings)?;

		let request_id = Hub::new_request_id();
		let assignment = self
			.hub
			.assign(&request_id)
			.ok_or(RelayError::NoSessionAvailable)?;
		let session_id = assignment.session_id;

		info!(
			target = "tabrelay::relay",
			request_id = %request_id,
			session_id = %session_id,
			model = %request.model,
			upstream = %job.model,
			stream = request.stream,
			"relaying request"
		);

		let assembler = ResponseAssembler::new(
			mode,
			&request_id,
			request.model.clone(),
			prompt_tokens(&request.messages),
		);
		// Owned from here on, so dropping this future mid-forward cancels the request.
		let mut call = RelayCall {
			hub: self.hub.clone(),
			request_id,
			session_id,
			replies: assignment.replies,
			decoder: StreamDecoder::new(),
			assembler,
			deadline,
			timeout,
			pacing: self.settings.chunk_pacing(),
			streaming: false,
			emitted: 0,
			finished: false,
		};

		let forwarded = timeout_at(deadline, self.hub.forward(&call.request_id, &job)).await;
		match forwarded {
			Ok(true) => Ok(call),
			Ok(false) => {
				call.release(RequestState::Failed);
				Err(RelayError::ForwardFailed {
					request_id: call.request_id.clone(),
					session_id: call.session_id.clone(),
				})
			}
			Err(_) => {
				let ms = timeout.as_millis() as u64;
				warn!(
					target = "tabrelay::relay",
					request_id = %call.request_id,
					session_id = %call.session_id,
					timeout_ms = ms,
					"session queue stayed full until the deadline"
				);
				call.release(RequestState::TimedOut);
				Err(RelayError::Timeout { ms })
			}
		}
	}

	/// Streams chunks for the request, ending with a terminal chunk (finish reason or error).
	pub async fn stream(
		&self,
		request: &ChatCompletionRequest,
	) -> Result<BoxStream<'static, ChatCompletionChunk>> {
		let call = self.start(request, AssemblyMode::Incremental).await?;
		Ok(stream::unfold(call, |mut call| async move {
			let chunk = call.next_chunk().await?;
			Some((chunk, call))
		})
		.boxed())
	}

	/// Awaits the aggregate response for the request.
	pub async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
		let mut call = self.start(request, AssemblyMode::Buffered).await?;
		while let Some(out) = call.next().await {
			match out {
				Assembled::Response(response) => return Ok(response),
				Assembled::Failure { error, .. } => return Err(error),
				Assembled::Delta(_) | Assembled::FinalChunk(_) => {}
			}
		}
		Err(RelayError::Internal(
			"reply ended without a terminal event".into(),
		))
	}
}

/// One in-flight relayed request.
#[derive(Debug)]
pub struct RelayCall {
	hub: Hub,
	request_id: String,
	session_id: String,
	replies: mpsc::UnboundedReceiver<ReplyFrame>,
	decoder: StreamDecoder,
	assembler: ResponseAssembler,
	deadline: Instant,
	timeout: Duration,
	pacing: Duration,
	streaming: bool,
	emitted: u64,
	finished: bool,
}

impl RelayCall {
	pub fn request_id(&self) -> &str {
		&self.request_id
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn is_finished(&self) -> bool {
		self.finished
	}

	/// Next assembled output. Returns `None` once a terminal output was produced.
	pub async fn next(&mut self) -> Option<Assembled> {
		if self.finished {
			return None;
		}

		loop {
			let frame = match timeout_at(self.deadline, self.replies.recv()).await {
				Ok(Some(frame)) => frame,
				Ok(None) => {
					let out = self.assembler.fail(RelayError::SessionClosed);
					return Some(self.terminate(RequestState::Failed, out));
				}
				Err(_) => return Some(self.time_out()),
			};
			if Instant::now() >= self.deadline {
				return Some(self.time_out());
			}

			let event = match frame {
				ReplyFrame::Line(line) => match self.decoder.decode_line(&line) {
					Some(event) => event,
					None => continue,
				},
				ReplyFrame::Done => StreamEvent::Completion {
					finish_reason: FinishReason::Stop,
				},
				ReplyFrame::Error(message) => {
					let out = self.assembler.fail(RelayError::Session(message));
					return Some(self.terminate(RequestState::Failed, out));
				}
			};

			if let StreamEvent::ParseError { line, reason } = &event {
				warn!(
					target = "tabrelay::relay",
					request_id = %self.request_id,
					line = %line,
					reason = %reason,
					"skipping undecodable reply line"
				);
				continue;
			}

			if !self.streaming {
				self.streaming = true;
				self.hub.transition(&self.request_id, RequestState::Streaming);
			}

			match self.assembler.apply(event, self.decoder.state()) {
				None => continue,
				Some(Assembled::Delta(chunk)) => {
					self.pace().await;
					if Instant::now() >= self.deadline {
						return Some(self.time_out());
					}
					self.emitted += 1;
					return Some(Assembled::Delta(chunk));
				}
				Some(terminal) => {
					let state = match &terminal {
						Assembled::Failure { .. } => RequestState::Failed,
						_ => RequestState::Completed,
					};
					return Some(self.terminate(state, terminal));
				}
			}
		}
	}

	/// Next chunk in incremental mode.
	pub async fn next_chunk(&mut self) -> Option<ChatCompletionChunk> {
		match self.next().await? {
			Assembled::Delta(chunk) | Assembled::FinalChunk(chunk) => Some(chunk),
			Assembled::Failure {
				chunk: Some(chunk), ..
			} => Some(chunk),
			Assembled::Failure { chunk: None, .. } | Assembled::Response(_) => None,
		}
	}

	/// Sleeps the configured pacing delay before every chunk but the first, never past the
	/// deadline.
	async fn pace(&self) {
		if self.pacing.is_zero() || self.emitted == 0 {
			return;
		}
		let wake = (Instant::now() + self.pacing).min(self.deadline);
		sleep_until(wake).await;
	}

	fn time_out(&mut self) -> Assembled {
		let ms = self.timeout.as_millis() as u64;
		warn!(
			target = "tabrelay::relay",
			request_id = %self.request_id,
			timeout_ms = ms,
			"request timed out"
		);
		let out = self.assembler.fail(RelayError::Timeout { ms });
		self.terminate(RequestState::TimedOut, out)
	}

	/// Records the terminal state and releases the request in the hub.
	fn release(&mut self, state: RequestState) {
		self.finished = true;
		self.hub.transition(&self.request_id, state);
		self.hub.complete(&self.request_id);
	}

	fn terminate(&mut self, state: RequestState, out: Assembled) -> Assembled {
		self.release(state);
		match &out {
			Assembled::Failure { error, .. } => warn!(
				target = "tabrelay::relay",
				request_id = %self.request_id,
				session_id = %self.session_id,
				state = ?state,
				error = %error,
				"request failed"
			),
			_ => info!(
				target = "tabrelay::relay",
				request_id = %self.request_id,
				chars = self.decoder.state().text.len(),
				"request completed"
			),
		}
		out
	}
}

impl Drop for RelayCall {
	fn drop(&mut self) {
		if !self.finished {
			debug!(target = "tabrelay::relay", request_id = %self.request_id, "caller went away, cancelling");
			self.hub.cancel(&self.request_id);
		}
	}
}
