//! Streaming session controller.
//!
//! Orchestrates one request/response exchange: opens the HTTP stream, feeds
//! the frame decoder, routes events to the right sink (text accumulator,
//! audio scheduler, suggestion/metadata stores), tracks latency metrics, and
//! guarantees the completion callback fires exactly once.

use crate::config::{StreamConfig, UserContext};
use crate::error::{Result, StreamError, StreamFailure};
use crate::events::{extract_token, StreamEvent};
use crate::scheduler::{AudioOutput, AudioScheduler, PlaybackState};
use crate::session::{SessionPhase, SessionShared, StreamMetrics};
use crate::sse::decode_events;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

/// Trailing suggestion-marker syntax the server may emit mid-stream, e.g.
/// `[SUGGESTIONS]...` or `[SUGGESTION: ...]`. Anchored to end-of-string so
/// legitimate bracket usage earlier in the text is never damaged.
static SUGGESTION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\s*\[SUGGESTIONS?\b.*$").expect("valid marker pattern"));

/// Strip a trailing (possibly partial) suggestion marker from accumulated text.
fn strip_trailing_marker(text: &str) -> String {
    SUGGESTION_MARKER.replace(text, "").trim_end().to_string()
}

const MARKER_PREFIX: &str = "[SUGGESTIONS";

/// How much of `text` is safe to forward to `on_text`.
///
/// Everything from a suggestion marker onward is control data, and a trailing
/// prefix of a marker (the marker may arrive split across tokens) is held
/// back until it either completes or turns out to be ordinary text.
fn visible_len(text: &str) -> usize {
    if let Some(m) = SUGGESTION_MARKER.find(text) {
        return m.start();
    }
    match text.rfind('[') {
        Some(i) if MARKER_PREFIX.starts_with(&text[i..]) => i,
        _ => text.len(),
    }
}

/// Everything delivered to the caller when a session completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOutcome {
    /// The final answer: the server's authoritative value when supplied,
    /// otherwise the locally accumulated text.
    pub full_answer: String,
    /// Suggestions gathered during the stream or on the terminal event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Value>,
    /// Session metrics.
    pub metrics: StreamMetrics,
    /// Most recent metadata payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Callbacks delivered to the external UI collaborator.
///
/// Every method has a no-op default, so implementors override only what they
/// paint. Benign decode hiccups never reach this surface; only `on_error` /
/// `on_connection_error` warrant a terminal error display.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// A text token arrived, in server emission order.
    async fn on_text(&self, _token: &str) {}

    /// A server status update arrived.
    async fn on_status(&self, _status: &Value) {}

    /// Suggestions for the completed exchange.
    async fn on_suggestions(&self, _suggestions: &Value) {}

    /// A metadata payload arrived (most recent wins).
    async fn on_metadata(&self, _metadata: &Value) {}

    /// The session completed. Fires exactly once per session.
    async fn on_complete(&self, _outcome: StreamOutcome) {}

    /// The server declared an application-level error.
    async fn on_error(&self, _failure: StreamFailure) {}

    /// The connection itself failed (non-2xx, network abort, truncated body).
    async fn on_connection_error(&self, _error: StreamError) {}
}

/// Default no-op handler.
#[derive(Debug, Clone, Default)]
pub struct NoOpHandler;

#[async_trait]
impl StreamHandler for NoOpHandler {}

/// Per-stream accumulators, owned by the read loop.
///
/// The completion path reads these at the moment the terminal event fires —
/// authoritative session state, never a stale captured copy.
#[derive(Default)]
struct StreamProgress {
    text: String,
    /// Bytes of `text` already forwarded through `on_text`.
    emitted: usize,
    suggestions: Option<Value>,
    metadata: Option<Value>,
    first_token_ms: Option<u64>,
    first_audio_ms: Option<u64>,
}

struct ControllerState {
    phase: SessionPhase,
    session: Option<Arc<SessionShared>>,
    last_query: Option<String>,
    last_user: Option<UserContext>,
    default_user: UserContext,
}

/// Client for a server-sent token/audio event stream.
///
/// At most one session is active at a time; a new [`send_message`] is only
/// permitted once the previous session reached a terminal phase.
///
/// [`send_message`]: StreamController::send_message
pub struct StreamController {
    config: StreamConfig,
    http: reqwest::Client,
    handler: Arc<dyn StreamHandler>,
    scheduler: Option<Arc<AudioScheduler>>,
    state: Mutex<ControllerState>,
}

impl StreamController {
    /// Create a controller without audio playback (text-only consumption).
    pub fn new(config: StreamConfig, handler: Arc<dyn StreamHandler>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            handler,
            scheduler: None,
            state: Mutex::new(ControllerState {
                phase: SessionPhase::Idle,
                session: None,
                last_query: None,
                last_user: None,
                default_user: UserContext::default(),
            }),
        }
    }

    /// Create a controller that plays audio through the given output.
    pub fn with_audio_output(
        config: StreamConfig,
        handler: Arc<dyn StreamHandler>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let scheduler =
            Arc::new(AudioScheduler::new(output, config.audio_format, config.gap_policy));
        let mut controller = Self::new(config, handler);
        controller.scheduler = Some(scheduler);
        controller
    }

    /// Create a controller playing through the default desktop audio device.
    #[cfg(feature = "desktop-audio")]
    pub fn with_desktop_audio(
        config: StreamConfig,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Self> {
        let output = Arc::new(crate::playback::DeviceOutput::open(config.audio_format)?);
        Ok(Self::with_audio_output(config, handler, output))
    }

    /// Current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    /// Whether a session is in flight.
    pub fn is_streaming(&self) -> bool {
        self.phase() == SessionPhase::Streaming
    }

    /// Install the user context used when `send_message` gets none.
    ///
    /// Precedence at send time: explicit argument, then this context, then
    /// empty defaults.
    pub fn set_user_context(&self, user: UserContext) {
        self.state.lock().default_user = user;
    }

    /// Send a query and drive the streaming session to a terminal state.
    ///
    /// A no-op (with a warning) when a session is already streaming. The
    /// future resolves once the session reaches `Completed`, `Failed` or
    /// `Cancelled`; all results are delivered through the [`StreamHandler`].
    pub async fn send_message(&self, query: &str, user: Option<UserContext>) -> Result<()> {
        let session = {
            let mut state = self.state.lock();
            if state.phase == SessionPhase::Streaming {
                tracing::warn!("send_message ignored: a session is already streaming");
                return Ok(());
            }
            let session = SessionShared::new(query);
            state.phase = SessionPhase::Streaming;
            state.session = Some(session.clone());
            state.last_query = Some(query.to_string());
            state.last_user = user.clone();
            session
        };

        let user = user.unwrap_or_else(|| self.state.lock().default_user.clone());
        let body = self.config.request(query, &user);

        let send = self
            .http
            .post(&self.config.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = session.cancel_handle().cancelled() => return Ok(()),
            result = send => match result {
                Ok(response) => response,
                Err(err) => {
                    let err = StreamError::connection(format!("Request failed: {err}"));
                    self.connection_failure(&session, err).await;
                    return Ok(());
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = StreamError::Http { status: status.as_u16(), body: text };
            self.connection_failure(&session, err).await;
            return Ok(());
        }

        self.consume(&session, response.bytes_stream()).await;
        Ok(())
    }

    /// Re-issue the last query. Caller-invoked; no built-in backoff.
    pub async fn retry(&self) -> Result<()> {
        let (query, user) = {
            let state = self.state.lock();
            (state.last_query.clone(), state.last_user.clone())
        };
        match query {
            Some(query) => self.send_message(&query, user).await,
            None => {
                tracing::warn!("retry ignored: no previous query");
                Ok(())
            }
        }
    }

    /// Abort the in-flight request and stop audio playback.
    ///
    /// Cancellation is silent: neither `on_complete` nor `on_error` fires —
    /// the caller already knows it initiated the cancellation.
    pub fn stop_streaming(&self) {
        let session = {
            let mut state = self.state.lock();
            if state.phase == SessionPhase::Streaming {
                state.phase = SessionPhase::Cancelled;
            }
            state.session.clone()
        };
        if let Some(session) = session {
            session.cancel_handle().cancel();
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
    }

    /// Suspend audio playback without losing scheduled state.
    pub fn pause_audio(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.pause();
        }
    }

    /// Resume audio playback exactly where it left off.
    pub fn resume_audio(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.resume();
        }
    }

    /// Mute or unmute audio output (a gain ramp; scheduling continues).
    pub fn set_muted(&self, muted: bool) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.set_muted(muted);
        }
    }

    /// Snapshot of audio playback state; `None` when audio is disabled.
    pub fn audio_state(&self) -> Option<PlaybackState> {
        self.scheduler.as_ref().map(|s| s.playback_state())
    }

    /// Read the decoded event stream until a terminal condition.
    async fn consume<S>(&self, session: &Arc<SessionShared>, byte_stream: S)
    where
        S: futures::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>>
            + Send
            + 'static,
    {
        let mut events = decode_events(byte_stream);
        let mut progress = StreamProgress::default();

        loop {
            let item = tokio::select! {
                _ = session.cancel_handle().cancelled() => return,
                item = events.next() => item,
            };

            match item {
                None => {
                    // End of stream. Normal after a terminal event; a failure
                    // when the server hung up mid-session.
                    if session.try_complete() {
                        self.finish(session, SessionPhase::Failed);
                        self.handler.on_connection_error(StreamError::UnexpectedEof).await;
                    }
                    return;
                }
                Some(Err(err)) => {
                    if session.cancel_handle().is_cancelled() {
                        return;
                    }
                    if session.try_complete() {
                        self.finish(session, SessionPhase::Failed);
                        self.handler.on_connection_error(err).await;
                    }
                    return;
                }
                Some(Ok(event)) => {
                    if session.is_completed() {
                        tracing::debug!("Ignoring event after terminal state");
                        continue;
                    }
                    self.dispatch(session, &mut progress, event).await;
                }
            }
        }
    }

    /// Route one decoded event to its sink.
    async fn dispatch(
        &self,
        session: &Arc<SessionShared>,
        progress: &mut StreamProgress,
        event: StreamEvent,
    ) {
        match event {
            StreamEvent::Connected => {
                tracing::debug!("Stream connected");
            }
            StreamEvent::Status(status) => {
                self.handler.on_status(&status).await;
            }
            StreamEvent::Text(data) => {
                let Some(token) = extract_token(&data) else {
                    tracing::warn!("Text event without extractable token");
                    return;
                };
                if progress.first_token_ms.is_none() {
                    progress.first_token_ms =
                        Some(session.started_at.elapsed().as_millis() as u64);
                }
                progress.text.push_str(token);

                // Forward only text before any suggestion marker: the marker
                // and its tail are control data, not answer prose.
                let visible = visible_len(&progress.text);
                if visible > progress.emitted {
                    let chunk = progress.text[progress.emitted..visible].to_string();
                    progress.emitted = visible;
                    self.handler.on_text(&chunk).await;
                }
            }
            StreamEvent::Audio(payload) => {
                if progress.first_audio_ms.is_none() {
                    progress.first_audio_ms =
                        Some(session.started_at.elapsed().as_millis() as u64);
                }
                // Audio faults never reach the text path: voice is a
                // value-add, not the primary channel.
                if let Some(scheduler) = &self.scheduler {
                    if let Err(err) = scheduler.add_chunk(payload.sequence, &payload.chunk) {
                        tracing::warn!(sequence = payload.sequence, "Audio chunk failed: {err}");
                    }
                }
            }
            StreamEvent::Suggestions(suggestions) => {
                progress.suggestions = Some(suggestions);
            }
            StreamEvent::Metadata(metadata) => {
                self.handler.on_metadata(&metadata).await;
                progress.metadata = Some(metadata);
            }
            StreamEvent::Done(payload) => {
                // Duplicate terminal events are expected server behavior;
                // the claim makes the completion path run exactly once.
                if !session.try_complete() {
                    tracing::debug!("Duplicate terminal event ignored");
                    return;
                }

                // The server's view of the answer is authoritative when
                // present.
                let raw = payload.full_answer.unwrap_or_else(|| std::mem::take(&mut progress.text));
                let full_answer = strip_trailing_marker(&raw);

                let metrics = StreamMetrics {
                    duration_ms: session.started_at.elapsed().as_millis() as u64,
                    first_token_latency_ms: progress.first_token_ms,
                    first_audio_latency_ms: progress.first_audio_ms,
                    word_count: full_answer.split_whitespace().count(),
                    server: payload.metrics,
                };

                if let Some(scheduler) = &self.scheduler {
                    scheduler.finalize();
                }

                let suggestions = payload.suggestions.or_else(|| progress.suggestions.take());
                let metadata = payload.metadata.or_else(|| progress.metadata.take());

                if let Some(suggestions) = &suggestions {
                    self.handler.on_suggestions(suggestions).await;
                }
                self.handler
                    .on_complete(StreamOutcome { full_answer, suggestions, metrics, metadata })
                    .await;

                // Only after on_complete does the session leave Streaming.
                self.finish(session, SessionPhase::Completed);
            }
            StreamEvent::Error(payload) => {
                if !session.try_complete() {
                    return;
                }
                self.finish(session, SessionPhase::Failed);
                let message =
                    payload.message.unwrap_or_else(|| "Unknown server error".to_string());
                let failure = StreamFailure::classify(message, payload.error.as_deref());
                self.handler.on_error(failure).await;
            }
            StreamEvent::Close => {
                tracing::debug!("Server signalled close");
            }
            StreamEvent::Unknown { event, .. } => {
                tracing::warn!(event, "Dropping unrecognized event type");
            }
        }
    }

    /// Record a connection-level failure for this session.
    async fn connection_failure(&self, session: &Arc<SessionShared>, err: StreamError) {
        if session.cancel_handle().is_cancelled() || !session.try_complete() {
            return;
        }
        self.finish(session, SessionPhase::Failed);
        self.handler.on_connection_error(err).await;
    }

    /// Move the controller to a terminal phase, but only if `session` is
    /// still the current one (a newer session may have replaced it).
    fn finish(&self, session: &Arc<SessionShared>, phase: SessionPhase) {
        let mut state = self.state.lock();
        if state.session.as_ref().is_some_and(|current| Arc::ptr_eq(current, session)) {
            state.phase = phase;
        }
    }
}
