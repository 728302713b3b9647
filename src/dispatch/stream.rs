use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use reqwest::Response;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::RequestData;
use crate::dispatch::abort::{TaskGuard, cancelled};
use crate::dispatch::http::{HttpTransport, MAX_RESPONSE_BYTES};
use crate::error::BridgeError;
use crate::parsers::{ChunkOutcome, ChunkParser};

/// Event protocol of a stream: any number of messages, then one End or Error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Message(String),
    End,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Ended,
    Errored,
}

type MessageHandler = Box<dyn FnMut(String) + Send>;
type EndHandler = Box<dyn FnOnce() + Send>;
type ErrorHandler = Box<dyn FnOnce(String) + Send>;

/// Handler set for a stream. Unset handlers are skipped.
#[derive(Default)]
pub struct StreamCallbacks {
    on_message: Option<MessageHandler>,
    on_end: Option<EndHandler>,
    on_error: Option<ErrorHandler>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message(mut self, handler: impl FnMut(String) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(handler));
        self
    }

    pub fn on_end(mut self, handler: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }
}

enum Terminal {
    End,
    Error(String),
    Cancelled,
}

type PayloadStream = Pin<Box<dyn Stream<Item = Result<String, BridgeError>> + Send>>;

/// A live backend stream.
///
/// Handlers are registered on the value before `stream()` consumes it, so a
/// stream can only run once. After the terminal event no handler fires again.
/// Cancelling the attached controller stops the read loop and ends the
/// stream with End, not Error.
pub struct StreamResponse {
    transport: Arc<HttpTransport>,
    data: RequestData,
    parser: Box<dyn ChunkParser>,
    platform: String,
    max_trials: u32,
    guard: TaskGuard,
    callbacks: StreamCallbacks,
    state: StreamState,
}

impl StreamResponse {
    pub(crate) fn new(
        transport: Arc<HttpTransport>,
        data: RequestData,
        parser: Box<dyn ChunkParser>,
        platform: String,
        max_trials: u32,
        guard: TaskGuard,
    ) -> Self {
        Self {
            transport,
            data,
            parser,
            platform,
            max_trials,
            guard,
            callbacks: StreamCallbacks::default(),
            state: StreamState::Idle,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn on_message(mut self, handler: impl FnMut(String) + Send + 'static) -> Self {
        self.callbacks.on_message = Some(Box::new(handler));
        self
    }

    pub fn on_end(mut self, handler: impl FnOnce() + Send + 'static) -> Self {
        self.callbacks.on_end = Some(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl FnOnce(String) + Send + 'static) -> Self {
        self.callbacks.on_error = Some(Box::new(handler));
        self
    }

    /// Register a whole handler set. Handlers it sets replace existing ones.
    pub fn add_callbacks(mut self, callbacks: StreamCallbacks) -> Self {
        if callbacks.on_message.is_some() {
            self.callbacks.on_message = callbacks.on_message;
        }
        if callbacks.on_end.is_some() {
            self.callbacks.on_end = callbacks.on_end;
        }
        if callbacks.on_error.is_some() {
            self.callbacks.on_error = callbacks.on_error;
        }
        self
    }

    /// Read the stream to its terminal event and return the final state.
    pub async fn stream(mut self) -> StreamState {
        self.state = StreamState::Streaming;
        let token = self.guard.token();

        match self.read(token.as_ref()).await {
            Terminal::End => self.end(),
            Terminal::Cancelled => {
                tracing::debug!(platform = %self.platform, "stream cancelled");
                self.end();
            }
            Terminal::Error(message) => {
                self.state = StreamState::Errored;
                if let Some(handler) = self.callbacks.on_error.take() {
                    handler(message);
                }
            }
        }
        self.callbacks = StreamCallbacks::default();

        // Dropping self finishes the guard, which runs the task cleanup.
        self.state
    }

    /// Consume the stream as a channel of events instead of handlers.
    /// Replaces any handlers registered so far. Must be called inside a
    /// tokio runtime.
    pub fn into_events(self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let message_tx = tx.clone();
        let end_tx = tx.clone();

        let response = self
            .on_message(move |text| {
                let _ = message_tx.send(StreamEvent::Message(text));
            })
            .on_end(move || {
                let _ = end_tx.send(StreamEvent::End);
            })
            .on_error(move |error| {
                let _ = tx.send(StreamEvent::Error(error));
            });

        tokio::spawn(response.stream());
        rx
    }

    fn end(&mut self) {
        self.state = StreamState::Ended;
        if let Some(handler) = self.callbacks.on_end.take() {
            handler();
        }
    }

    async fn read(&mut self, token: Option<&CancellationToken>) -> Terminal {
        let response = match connect(
            &self.transport,
            &self.data,
            &self.platform,
            self.max_trials,
            token,
        )
        .await
        {
            Ok(Some(response)) => response,
            Ok(None) => return Terminal::Cancelled,
            Err(e) => {
                tracing::warn!(platform = %self.platform, "failed to open bot stream: {e}");
                return Terminal::Error(e.user_message());
            }
        };

        let mut payloads = payloads(response);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(token) => return Terminal::Cancelled,
                next = payloads.next() => next,
            };

            let payload = match next {
                None => return Terminal::End,
                Some(Ok(payload)) => payload,
                Some(Err(e)) => {
                    tracing::warn!(platform = %self.platform, "bot stream broke: {e}");
                    return Terminal::Error(e.user_message());
                }
            };

            let chunk: Value = match serde_json::from_str(&payload) {
                Ok(chunk) => chunk,
                Err(_) => {
                    tracing::debug!(platform = %self.platform, "ignoring non-JSON stream chunk");
                    continue;
                }
            };

            match self.parser.parse(&chunk) {
                ChunkOutcome::Message(text) => {
                    if let Some(handler) = self.callbacks.on_message.as_mut() {
                        handler(text);
                    }
                }
                ChunkOutcome::End => return Terminal::End,
                ChunkOutcome::Error(message) => return Terminal::Error(message),
                ChunkOutcome::Ignore => {}
            }
        }
    }
}

/// Open the stream, retrying connection failures before the first byte.
/// `Ok(None)` means the caller cancelled.
async fn connect(
    transport: &HttpTransport,
    data: &RequestData,
    platform: &str,
    max_trials: u32,
    token: Option<&CancellationToken>,
) -> Result<Option<Response>, BridgeError> {
    let mut attempt = 0;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancelled(token) => return Ok(None),
            outcome = transport.open_stream(data, platform) => outcome,
        };

        match outcome {
            Ok(response) => return Ok(Some(response)),
            Err(e) if e.is_retryable() && attempt < max_trials => {
                attempt += 1;
                tracing::warn!(platform, attempt, "opening bot stream failed, retrying: {e}");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Split the body into chunk payloads according to its content type.
fn payloads(response: Response) -> PayloadStream {
    let is_sse = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    if is_sse {
        Box::pin(response.bytes_stream().eventsource().map(|event| match event {
            Ok(event) => Ok(event.data),
            Err(EventStreamError::Transport(e)) => Err(BridgeError::Request(e)),
            Err(e) => Err(BridgeError::SchemaParse(format!("malformed event stream: {e}"))),
        }))
    } else {
        ndjson_payloads(response)
    }
}

struct LineReader {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    overflowed: bool,
    closed: bool,
}

impl LineReader {
    fn drain_lines(&mut self, flush: bool) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
        if flush && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.push_line(&rest);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        let text = text.strip_prefix("data:").map(str::trim_start).unwrap_or(text);
        if !text.is_empty() {
            self.pending.push_back(text.to_string());
        }
    }
}

/// Newline-delimited JSON, blank lines skipped, optional `data:` prefix.
/// An unterminated line longer than `MAX_RESPONSE_BYTES` fails the stream.
fn ndjson_payloads(response: Response) -> PayloadStream {
    let reader = LineReader {
        bytes: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()))),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        overflowed: false,
        closed: false,
    };

    Box::pin(futures_util::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(line) = reader.pending.pop_front() {
                return Some((Ok(line), reader));
            }
            if reader.overflowed {
                reader.overflowed = false;
                reader.closed = true;
                let error = BridgeError::SchemaParse(format!(
                    "stream line exceeds {MAX_RESPONSE_BYTES} bytes"
                ));
                return Some((Err(error), reader));
            }
            if reader.closed {
                return None;
            }
            match reader.bytes.next().await {
                Some(Ok(chunk)) => {
                    reader.buffer.extend_from_slice(&chunk);
                    reader.drain_lines(false);
                    if reader.buffer.len() > MAX_RESPONSE_BYTES {
                        reader.buffer = Vec::new();
                        reader.overflowed = true;
                    }
                }
                Some(Err(e)) => {
                    reader.closed = true;
                    return Some((Err(BridgeError::Request(e)), reader));
                }
                None => {
                    reader.closed = true;
                    reader.drain_lines(true);
                }
            }
        }
    }))
}
