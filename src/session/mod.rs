//! Per-session state and orchestration
//!
//! Each session runs as one tokio task fed by a command channel, so frame
//! analysis, voice-activity transitions, turn batching, and cancellation
//! are serialized per session while distinct sessions proceed in parallel.

pub mod orchestrator;
pub mod registry;
pub mod turn;

pub use orchestrator::{spawn_session, SessionContext};
pub use registry::{SessionHandle, SessionInfo, SessionRegistry};
pub use turn::{DrainedTurn, TurnBuffer, INACTIVITY_TIMEOUT_MS};

use crate::audio::AudioFrame;
use crate::Result;

/// Commands processed by a session's actor task.
///
/// Timer and task completions carry the generation current when they were
/// started; a stale generation means the work was cancelled or superseded
/// and the command is dropped on delivery.
#[derive(Debug)]
pub enum SessionCommand {
    /// One frame of client audio
    Frame(AudioFrame),
    /// Enter processing mode, clearing buffered state
    StartProcessing,
    /// Leave processing mode, flushing any buffered turn first
    StopProcessing,
    /// Transport closed or session replaced; tear everything down
    Shutdown,
    /// The 4 s silence timer fired
    SilenceElapsed { generation: u64 },
    /// The 2 s turn inactivity timer fired
    InactivityElapsed { generation: u64 },
    /// A reply task completed
    ReplyFinished {
        generation: u64,
        result: Result<String>,
        transcript: String,
        confidence: f32,
    },
    /// A synthesis task completed
    SynthFinished {
        generation: u64,
        result: Result<Vec<u8>>,
        text: String,
    },
}

/// Session id format: `session_<userId>_<epochMillis>`
#[must_use]
pub fn session_id(user_id: &str, now_ms: i64) -> String {
    format!("session_{user_id}_{now_ms}")
}
