//! HTTP and WebSocket surface

pub mod http;
pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, SttBackend};
use crate::conversation::ConversationStore;
use crate::session::SessionRegistry;
use crate::upstream::{
    deepgram, realtime, ChatResponder, DeepgramTranscriber, RealtimeTranscriber, Responder,
    SpeechSynthesizer, Synthesizer, Transcriber,
};
use crate::Result;

/// Shared state for the transport and HTTP handlers
pub struct AppState {
    pub config: Config,
    pub registry: SessionRegistry,
    pub store: ConversationStore,
    /// Present only when an STT credential is configured
    pub transcriber: Option<Arc<dyn Transcriber>>,
    /// Present only when an LLM credential is configured
    pub responder: Option<Arc<dyn Responder>>,
    /// Present only when a TTS credential is configured
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    pub started_at: Instant,
}

impl AppState {
    /// Build process state, wiring upstream adapters from whichever
    /// credentials are present.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let transcriber = build_transcriber(&config);
        let responder = build_responder(&config);
        let synthesizer = build_synthesizer(&config);

        tracing::info!(
            transcription = transcriber.is_some(),
            responses = responder.is_some(),
            tts = synthesizer.is_some(),
            "upstream capabilities"
        );

        Self {
            config,
            registry: SessionRegistry::new(),
            store: ConversationStore::new(),
            transcriber,
            responder,
            synthesizer,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn is_tts_available(&self) -> bool {
        self.synthesizer.is_some()
    }
}

fn build_transcriber(config: &Config) -> Option<Arc<dyn Transcriber>> {
    match config.resolved_stt_backend()? {
        SttBackend::Deepgram => {
            let Some(key) = config.keys.deepgram.clone() else {
                tracing::warn!("byte-stream STT backend selected but DEEPGRAM_API_KEY is missing");
                return None;
            };
            let model = config
                .stt_model
                .clone()
                .unwrap_or_else(|| deepgram::DEFAULT_LISTEN_MODEL.to_string());
            DeepgramTranscriber::new(key, model)
                .ok()
                .map(|t| Arc::new(t) as Arc<dyn Transcriber>)
        }
        SttBackend::Realtime => {
            let Some(key) = config.keys.openai.clone() else {
                tracing::warn!("realtime STT backend selected but OPENAI_API_KEY is missing");
                return None;
            };
            let model = config
                .stt_model
                .clone()
                .unwrap_or_else(|| realtime::DEFAULT_TRANSCRIBE_MODEL.to_string());
            RealtimeTranscriber::new(key, model)
                .ok()
                .map(|t| Arc::new(t) as Arc<dyn Transcriber>)
        }
    }
}

fn build_responder(config: &Config) -> Option<Arc<dyn Responder>> {
    let key = config.keys.openai.clone()?;
    ChatResponder::new(key, config.llm_model.clone())
        .ok()
        .map(|r| Arc::new(r) as Arc<dyn Responder>)
}

fn build_synthesizer(config: &Config) -> Option<Arc<dyn Synthesizer>> {
    if let Some(key) = config.keys.elevenlabs.clone() {
        return SpeechSynthesizer::new_elevenlabs(key, config.tts_voice.clone())
            .ok()
            .map(|s| Arc::new(s) as Arc<dyn Synthesizer>);
    }
    let key = config.keys.openai.clone()?;
    SpeechSynthesizer::new_openai(key, config.tts_voice.clone())
        .ok()
        .map(|s| Arc::new(s) as Arc<dyn Synthesizer>)
}

/// Assemble the full router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    http::router(Arc::clone(&state))
        .merge(ws::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped.
///
/// # Errors
///
/// Returns an error if the listen address cannot be bound.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
