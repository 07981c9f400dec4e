//! Configuration for streaming sessions.

use crate::audio::AudioFormat;
use crate::scheduler::GapPolicy;
use serde::{Deserialize, Serialize};

/// Caller identity attached to each request.
///
/// All fields are normalized to empty strings on the wire — never null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// User's display name.
    #[serde(default)]
    pub name: String,
    /// User's phone number.
    #[serde(default)]
    pub phone: String,
    /// User's email address.
    #[serde(default)]
    pub email: String,
}

impl UserContext {
    /// Create a context with every field set.
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), phone: phone.into(), email: email.into() }
    }
}

/// JSON body of the streaming POST request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    /// Chatbot the query targets.
    pub chatbot_id: String,
    /// The user's query.
    pub query: String,
    /// Conversation session identifier.
    pub session_id: String,
    /// Whether the server should synthesize speech.
    #[serde(rename = "enableTTS")]
    pub enable_tts: bool,
    /// User phone (empty string when unknown).
    pub phone: String,
    /// User name (empty string when unknown).
    pub name: String,
    /// User email (empty string when unknown).
    pub email: String,
}

/// Configuration for a [`StreamController`].
///
/// [`StreamController`]: crate::controller::StreamController
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Streaming endpoint URL.
    pub endpoint: String,
    /// Chatbot identifier sent with every request.
    pub chatbot_id: String,
    /// Session identifier; defaults to a fresh v4 UUID.
    pub session_id: String,
    /// Whether to request synthesized speech.
    pub enable_tts: bool,
    /// PCM format of incoming audio.
    pub audio_format: AudioFormat,
    /// Policy for audio sequence gaps at finalize.
    pub gap_policy: GapPolicy,
}

impl StreamConfig {
    /// Create a configuration for an endpoint and chatbot.
    pub fn new(endpoint: impl Into<String>, chatbot_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            chatbot_id: chatbot_id.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
            enable_tts: true,
            audio_format: AudioFormat::default(),
            gap_policy: GapPolicy::default(),
        }
    }

    /// Set the session identifier.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Enable or disable speech synthesis.
    pub fn with_tts(mut self, enabled: bool) -> Self {
        self.enable_tts = enabled;
        self
    }

    /// Set the incoming PCM format.
    pub fn with_audio_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    /// Set the audio gap policy.
    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    /// Build the request body for a query under a user context.
    pub fn request(&self, query: &str, user: &UserContext) -> MessageRequest {
        MessageRequest {
            chatbot_id: self.chatbot_id.clone(),
            query: query.to_string(),
            session_id: self.session_id.clone(),
            enable_tts: self.enable_tts,
            phone: user.phone.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}
