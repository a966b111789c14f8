//! Audio analysis and voice activity tracking
//!
//! Frames arrive from the client as signed 16-bit mono PCM at 16 kHz. The
//! analyzer classifies each frame as voice or silence; the tracker debounces
//! those classifications into start/stop decisions for the transcriber.

mod analyzer;
mod vad;

pub use analyzer::{analyze, AnalysisResult, AudioFrame, VOICE_VOLUME_THRESHOLD};
pub use vad::{
    VadDecision, VadState, VoiceActivity, SILENCE_FRAME_THRESHOLD, SILENCE_TIMEOUT_MS,
    TRANSCRIPTION_RESTART_GUARD_MS, VOICE_FRAME_THRESHOLD,
};

/// Sample rate the gateway expects from clients (Hz)
pub const SAMPLE_RATE: u32 = 16_000;
