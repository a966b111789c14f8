//! Debounced voice activity tracking
//!
//! Consumes per-frame voice/silence classifications and decides when to
//! start and stop the streaming transcriber. Consecutive-frame thresholds
//! and the restart guard suppress the rapid start/stop oscillation that
//! would otherwise exceed upstream concurrency limits.

/// Consecutive voice frames required before transcription starts
pub const VOICE_FRAME_THRESHOLD: u32 = 3;

/// Consecutive silence frames required before the silence timer is armed
pub const SILENCE_FRAME_THRESHOLD: u32 = 5;

/// Minimum gap between two transcription starts
pub const TRANSCRIPTION_RESTART_GUARD_MS: i64 = 2_000;

/// Silence duration after which transcription stops
pub const SILENCE_TIMEOUT_MS: u64 = 4_000;

/// Tracker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech
    Idle,
    /// Voice seen, waiting for enough consecutive frames
    ArmingSpeech,
    /// Transcription running
    Transcribing,
    /// Sustained silence during transcription, timer armed
    ArmingSilence,
}

/// Decision emitted by one tracker step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    None,
    StartTranscription,
    StopTranscription,
    ArmSilenceTimer,
    CancelSilenceTimer,
}

/// Debounced speech/silence state machine, one per session
#[derive(Debug)]
pub struct VoiceActivity {
    state: VadState,
    voice_frames: u32,
    silence_frames: u32,
    last_voice_ms: i64,
    last_transcription_start_ms: Option<i64>,
    transcription_started: bool,
}

impl Default for VoiceActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceActivity {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: VadState::Idle,
            voice_frames: 0,
            silence_frames: 0,
            last_voice_ms: 0,
            last_transcription_start_ms: None,
            transcription_started: false,
        }
    }

    /// Feed one frame classification. The voice and silence counters are
    /// mutually exclusive: incrementing one resets the other.
    pub fn step(&mut self, now_ms: i64, voice_active: bool) -> VadDecision {
        if voice_active {
            self.voice_frames += 1;
            self.silence_frames = 0;
            self.last_voice_ms = now_ms;

            match self.state {
                VadState::Idle => {
                    self.state = VadState::ArmingSpeech;
                    self.voice_frames = 1;
                    tracing::trace!("voice detected, arming speech");
                    VadDecision::None
                }
                VadState::ArmingSpeech => {
                    let guard_ok = self
                        .last_transcription_start_ms
                        .is_none_or(|t| now_ms - t > TRANSCRIPTION_RESTART_GUARD_MS);
                    if self.voice_frames >= VOICE_FRAME_THRESHOLD && guard_ok {
                        self.state = VadState::Transcribing;
                        self.transcription_started = true;
                        self.last_transcription_start_ms = Some(now_ms);
                        tracing::debug!(voice_frames = self.voice_frames, "speech confirmed");
                        VadDecision::StartTranscription
                    } else {
                        VadDecision::None
                    }
                }
                VadState::Transcribing => VadDecision::None,
                VadState::ArmingSilence => {
                    self.state = VadState::Transcribing;
                    tracing::trace!("voice resumed, cancelling silence timer");
                    VadDecision::CancelSilenceTimer
                }
            }
        } else {
            self.voice_frames = 0;
            self.silence_frames += 1;

            match self.state {
                VadState::Idle | VadState::ArmingSilence => VadDecision::None,
                VadState::ArmingSpeech => {
                    self.state = VadState::Idle;
                    VadDecision::None
                }
                VadState::Transcribing => {
                    if self.silence_frames >= SILENCE_FRAME_THRESHOLD {
                        self.state = VadState::ArmingSilence;
                        tracing::debug!(
                            silence_frames = self.silence_frames,
                            "sustained silence, arming silence timer"
                        );
                        VadDecision::ArmSilenceTimer
                    } else {
                        VadDecision::None
                    }
                }
            }
        }
    }

    /// The armed silence timer fired. Stale firings (voice resumed and the
    /// state left `ArmingSilence`) decide nothing.
    pub fn silence_elapsed(&mut self) -> VadDecision {
        if self.state != VadState::ArmingSilence {
            return VadDecision::None;
        }
        self.state = VadState::Idle;
        self.transcription_started = false;
        self.voice_frames = 0;
        self.silence_frames = 0;
        tracing::debug!("silence timeout elapsed, stopping transcription");
        VadDecision::StopTranscription
    }

    /// The transcriber went away outside the tracker's control (upstream
    /// error, failed open). Returns to `Idle` so the next speech burst can
    /// start a fresh transcription; the restart guard still applies.
    pub fn mark_transcription_stopped(&mut self) {
        self.state = VadState::Idle;
        self.transcription_started = false;
        self.voice_frames = 0;
        self.silence_frames = 0;
    }

    /// Full reset, clearing the restart guard as well.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.voice_frames = 0;
        self.silence_frames = 0;
        self.last_voice_ms = 0;
        self.last_transcription_start_ms = None;
        self.transcription_started = false;
    }

    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    #[must_use]
    pub const fn transcription_started(&self) -> bool {
        self.transcription_started
    }

    #[must_use]
    pub const fn last_voice_ms(&self) -> i64 {
        self.last_voice_ms
    }
}
