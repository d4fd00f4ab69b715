//! Chat stream events, the callback interface, and the decode loop.
//!
//! Contract:
//! - Callbacks fire in byte-arrival order, one per decoded event.
//! - `on_done` fires at most once per stream.
//! - A server `error` event is forwarded and the loop keeps reading.
//! - Cancellation ends the loop without invoking any callback.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::SilentClose;
use crate::error::{ChatClientError, CoreResult};
use crate::model::ChatRequest;
use crate::source::EventSource;
use crate::sse::{Decoded, FrameDecoder, Skip, parse_frame};

/// One decoded application event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Partial assistant text.
    Message(String),
    /// Backend assigned (or confirmed) the conversation id.
    SessionUpdate(String),
    Done,
    /// Application error reported by the backend inside the stream.
    Error(String),
}

impl ChatEvent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Message(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Reason passed to `StreamHandler::on_error`.
#[derive(Debug, Error)]
pub enum StreamFailure {
    /// The request could not be opened or the body stopped mid-read.
    #[error("transport failure: {0}")]
    Transport(ChatClientError),
    /// `{"event":"error"}` from the backend.
    #[error("server error: {0}")]
    Server(String),
    /// The body ended without a `done` or `error` event.
    #[error("stream closed before completion")]
    ClosedEarly,
}

/// Receives the events of one stream. Only `on_message` is mandatory.
pub trait StreamHandler {
    fn on_message(&mut self, text: String);
    fn on_session_update(&mut self, _session_id: String) {}
    fn on_done(&mut self) {}
    fn on_error(&mut self, _failure: StreamFailure) {}
}

type Slot<'a, T> = Option<Box<dyn FnMut(T) + Send + 'a>>;

/// Closure-based `StreamHandler` with one optional slot per event kind.
#[derive(Default)]
pub struct CallbackSet<'a> {
    message: Slot<'a, String>,
    session_update: Slot<'a, String>,
    done: Option<Box<dyn FnMut() + Send + 'a>>,
    error: Slot<'a, StreamFailure>,
}

impl<'a> CallbackSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, f: impl FnMut(String) + Send + 'a) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn with_session_update(mut self, f: impl FnMut(String) + Send + 'a) -> Self {
        self.session_update = Some(Box::new(f));
        self
    }

    pub fn with_done(mut self, f: impl FnMut() + Send + 'a) -> Self {
        self.done = Some(Box::new(f));
        self
    }

    pub fn with_error(mut self, f: impl FnMut(StreamFailure) + Send + 'a) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl StreamHandler for CallbackSet<'_> {
    fn on_message(&mut self, text: String) {
        if let Some(f) = self.message.as_mut() {
            f(text);
        }
    }

    fn on_session_update(&mut self, session_id: String) {
        if let Some(f) = self.session_update.as_mut() {
            f(session_id);
        }
    }

    fn on_done(&mut self) {
        if let Some(f) = self.done.as_mut() {
            f();
        }
    }

    fn on_error(&mut self, failure: StreamFailure) {
        if let Some(f) = self.error.as_mut() {
            f(failure);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `done` received (or synthesized under `SilentClose::Complete`).
    Completed,
    /// Body ended after a server `error` event and without `done`.
    ServerError,
    /// Body ended without `done` or `error`; reported as `StreamFailure::ClosedEarly`.
    ClosedEarly,
    /// Request failed to open or the body failed mid-read.
    TransportFailed,
    Cancelled,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::ServerError => "server_error",
            Self::ClosedEarly => "closed_early",
            Self::TransportFailed => "transport_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub outcome: StreamOutcome,
    /// Complete frames extracted from the body.
    pub frames: u32,
    /// `on_message` invocations.
    pub messages: u32,
    /// Frames dropped because their JSON did not parse.
    pub malformed: u32,
    /// Last id announced by a `session_update` event.
    pub session_id: Option<String>,
}

impl StreamSummary {
    fn new() -> Self {
        Self {
            outcome: StreamOutcome::Completed,
            frames: 0,
            messages: 0,
            malformed: 0,
            session_id: None,
        }
    }

    fn finish(mut self, outcome: StreamOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Boxed body of an event-stream response.
pub type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// Decode `body` and dispatch its events to `handler` until the body ends,
/// fails, or `cancel` fires.
pub async fn drive<H>(
    mut body: ByteStream,
    handler: &mut H,
    cancel: &CancellationToken,
    on_silent_close: SilentClose,
) -> StreamSummary
where
    H: StreamHandler + ?Sized,
{
    let mut decoder = FrameDecoder::new();
    let mut summary = StreamSummary::new();
    let mut done_seen = false;
    let mut server_error_seen = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("stream cancelled while waiting for data");
                return summary.finish(StreamOutcome::Cancelled);
            }
            next = body.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                tracing::warn!(error = %err, "stream body failed mid-read");
                handler.on_error(StreamFailure::Transport(err));
                return summary.finish(StreamOutcome::TransportFailed);
            }
            None => break,
        };

        for frame in decoder.push(&chunk) {
            if cancel.is_cancelled() {
                return summary.finish(StreamOutcome::Cancelled);
            }
            summary.frames += 1;
            tracing::trace!(frame = %frame, "sse frame");
            match parse_frame(&frame) {
                Decoded::Event(ChatEvent::Message(text)) => {
                    summary.messages += 1;
                    handler.on_message(text);
                }
                Decoded::Event(ChatEvent::SessionUpdate(id)) => {
                    summary.session_id = Some(id.clone());
                    handler.on_session_update(id);
                }
                Decoded::Event(ChatEvent::Done) => {
                    if done_seen {
                        tracing::debug!("ignoring repeated done event");
                    } else {
                        done_seen = true;
                        handler.on_done();
                    }
                }
                Decoded::Event(ChatEvent::Error(message)) => {
                    tracing::warn!(%message, "backend reported an error in stream");
                    server_error_seen = true;
                    handler.on_error(StreamFailure::Server(message));
                }
                Decoded::Skipped(Skip::EmptyAnswer) => {
                    tracing::warn!("message event without answer");
                }
                Decoded::Skipped(Skip::MissingSessionId) => {
                    tracing::warn!("session_update event without session_id");
                }
                Decoded::Skipped(Skip::UnknownKind(kind)) => {
                    tracing::debug!(?kind, "ignoring unknown event kind");
                }
                Decoded::Skipped(Skip::NoData | Skip::Heartbeat) => {}
                Decoded::Malformed(err) => {
                    summary.malformed += 1;
                    tracing::warn!(error = %err, frame = %frame, "failed to parse sse frame");
                }
            }
        }
    }

    if !decoder.is_empty() {
        tracing::debug!(residual = decoder.residual(), "dropping incomplete trailing frame");
    }

    if done_seen {
        return summary.finish(StreamOutcome::Completed);
    }
    if server_error_seen {
        return summary.finish(StreamOutcome::ServerError);
    }
    match on_silent_close {
        SilentClose::Complete => {
            tracing::debug!("stream closed without done; treating as complete");
            handler.on_done();
            summary.finish(StreamOutcome::Completed)
        }
        SilentClose::Error => {
            tracing::warn!("stream closed without done");
            handler.on_error(StreamFailure::ClosedEarly);
            summary.finish(StreamOutcome::ClosedEarly)
        }
    }
}

/// Open a stream on `source` and drive it. An open failure is reported once
/// through `on_error`; cancellation while opening invokes nothing.
pub async fn run<S, H>(
    source: &S,
    req: &ChatRequest,
    handler: &mut H,
    cancel: &CancellationToken,
    on_silent_close: SilentClose,
) -> StreamSummary
where
    S: EventSource + ?Sized,
    H: StreamHandler + ?Sized,
{
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("stream cancelled before response");
            return StreamSummary::new().finish(StreamOutcome::Cancelled);
        }
        opened = source.open(req) => opened,
    };

    match opened {
        Ok(body) => drive(body, handler, cancel, on_silent_close).await,
        Err(ChatClientError::Cancelled) => StreamSummary::new().finish(StreamOutcome::Cancelled),
        Err(err) => {
            tracing::warn!(error = %err, kind = err.kind(), "failed to open chat stream");
            handler.on_error(StreamFailure::Transport(err));
            StreamSummary::new().finish(StreamOutcome::TransportFailed)
        }
    }
}
