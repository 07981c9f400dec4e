//! # voicestream
//!
//! Client for a server-sent, multiplexed token/audio event stream from a
//! conversational assistant: decodes SSE frames, renders text incrementally
//! through callbacks, and plays synthesized speech with sample-accurate,
//! gapless timing.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP response body (arbitrary byte fragments)
//!            │
//!     ┌──────▼──────┐   RawFrame    ┌───────────────┐
//!     │  SseDecoder │──────────────▶│  StreamEvent  │
//!     └─────────────┘               └───────┬───────┘
//!                                           │ dispatch
//!                           ┌───────────────┼──────────────────┐
//!                    text   │        audio  │                  │ done/error
//!              ┌────────────▼───┐  ┌────────▼────────┐  ┌──────▼────────┐
//!              │ accumulator +  │  │ AudioScheduler  │  │ exactly-once  │
//!              │ on_text        │  │ (gapless drain) │  │ completion    │
//!              └────────────────┘  └─────────────────┘  └───────────────┘
//! ```
//!
//! The [`StreamController`] owns one session at a time; UI collaborators
//! implement [`StreamHandler`] and receive discrete callbacks (`on_text`,
//! `on_complete`, `on_error`, ...). Audio chunks may arrive out of order;
//! the [`AudioScheduler`] reassembles them by sequence number and schedules
//! each chunk to start exactly where the previous one ends on the output's
//! audio clock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use voicestream::{StreamConfig, StreamController, StreamHandler, StreamOutcome};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl StreamHandler for Printer {
//!     async fn on_text(&self, token: &str) {
//!         print!("{token}");
//!     }
//!     async fn on_complete(&self, outcome: StreamOutcome) {
//!         println!("\n[{} words]", outcome.metrics.word_count);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> voicestream::Result<()> {
//!     let config = StreamConfig::new("https://api.example.com/chat/stream", "bot-42");
//!     let controller = StreamController::new(config, std::sync::Arc::new(Printer));
//!     controller.send_message("hi", None).await?;
//!     Ok(())
//! }
//! ```
//!
//! With the `desktop-audio` feature, `StreamController::with_desktop_audio`
//! plays synthesized speech through the default output device.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod session;
pub mod sse;

#[cfg(feature = "desktop-audio")]
pub mod playback;

// Re-exports
pub use audio::AudioFormat;
pub use config::{MessageRequest, StreamConfig, UserContext};
pub use controller::{NoOpHandler, StreamController, StreamHandler, StreamOutcome};
pub use error::{Result, StreamError, StreamFailure, CREDITS_EXHAUSTED, SESSION_BANNED};
pub use events::{AudioPayload, DonePayload, ErrorPayload, RawFrame, StreamEvent};
pub use scheduler::{AudioOutput, AudioScheduler, GapPolicy, PlaybackState};
pub use session::{SessionPhase, StreamMetrics};
pub use sse::SseDecoder;

#[cfg(feature = "desktop-audio")]
pub use playback::DeviceOutput;
