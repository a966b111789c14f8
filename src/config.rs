//! Gateway configuration loaded from the environment
//!
//! Credentials are resolved once at startup. A missing credential disables
//! only the capability it backs: no STT key means audio is analyzed for
//! voice activity only, no LLM key means the canned fallback reply, no TTS
//! key means `tts-unavailable` notifications instead of audio.

use crate::{Error, Result};

/// Default transport listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default per-session language tag
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Default chat-completion model for reply generation
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Which streaming transcription backend to wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttBackend {
    /// Binary PCM over a persistent WebSocket byte stream
    Deepgram,
    /// Base64 PCM over a JSON WebSocket with server-side VAD
    Realtime,
}

/// Upstream provider credentials
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub deepgram: Option<String>,
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport listen port
    pub port: u16,
    /// Language tag used when `start-session` omits one
    pub default_language: String,
    /// Minimum confidence for a final transcript to enter a turn
    pub min_final_confidence: f32,
    /// Explicit STT backend selection; `None` means auto by credential
    pub stt_backend: Option<SttBackend>,
    /// Streaming transcription model; `None` uses the backend default
    pub stt_model: Option<String>,
    /// Chat-completion model for reply generation
    pub llm_model: String,
    /// TTS voice id; `None` uses the provider default
    pub tts_voice: Option<String>,
    /// Upstream credentials
    pub keys: ApiKeys,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PARLEY_STT_BACKEND` names an unknown backend.
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let stt_backend = match std::env::var("PARLEY_STT_BACKEND") {
            Ok(value) => Some(Self::parse_backend(&value)?),
            Err(_) => None,
        };

        Ok(Self {
            port,
            default_language: std::env::var("PARLEY_DEFAULT_LANGUAGE")
                .unwrap_or_else(|_| DEFAULT_LANGUAGE.to_string()),
            min_final_confidence: std::env::var("PARLEY_MIN_CONFIDENCE")
                .ok()
                .and_then(|s| s.parse::<f32>().ok())
                .unwrap_or(0.0),
            stt_backend,
            stt_model: non_empty(std::env::var("PARLEY_STT_MODEL").ok()),
            llm_model: std::env::var("PARLEY_LLM_MODEL")
                .unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            tts_voice: std::env::var("PARLEY_TTS_VOICE").ok(),
            keys: ApiKeys {
                deepgram: non_empty(std::env::var("DEEPGRAM_API_KEY").ok()),
                openai: non_empty(std::env::var("OPENAI_API_KEY").ok()),
                elevenlabs: non_empty(std::env::var("ELEVENLABS_API_KEY").ok()),
            },
        })
    }

    fn parse_backend(value: &str) -> Result<SttBackend> {
        match value.to_ascii_lowercase().as_str() {
            "deepgram" => Ok(SttBackend::Deepgram),
            "realtime" => Ok(SttBackend::Realtime),
            other => Err(Error::Config(format!("unknown STT backend: {other}"))),
        }
    }

    /// Resolve the STT backend: explicit selection wins, otherwise pick by
    /// which credential is present (byte-stream backend when both are).
    #[must_use]
    pub fn resolved_stt_backend(&self) -> Option<SttBackend> {
        if let Some(backend) = self.stt_backend {
            return Some(backend);
        }
        if self.keys.deepgram.is_some() {
            Some(SttBackend::Deepgram)
        } else if self.keys.openai.is_some() {
            Some(SttBackend::Realtime)
        } else {
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
