//! Upstream provider interfaces
//!
//! Three capabilities sit behind traits so the orchestrator never sees a
//! concrete provider: a [`Transcriber`] turning audio into transcript
//! fragments, a [`Responder`] turning a prompt into reply text, and a
//! [`Synthesizer`] turning reply text into audio bytes. Which backend is
//! wired is a configuration concern.

pub mod deepgram;
pub mod realtime;
pub mod responder;
pub mod synthesizer;

pub use deepgram::DeepgramTranscriber;
pub use realtime::RealtimeTranscriber;
pub use responder::{ChatResponder, Prompt, FALLBACK_REPLY};
pub use synthesizer::SpeechSynthesizer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::Result;

/// Upper bound on frames queued toward a transcriber before the oldest
/// are dropped
pub const OUTBOUND_QUEUE_FRAMES: usize = 64;

/// One recognized hypothesis from a transcriber
#[derive(Debug, Clone)]
pub struct TranscriptFragment {
    pub text: String,
    /// Provider confidence in [0, 1]
    pub confidence: f32,
    /// Partials may be superseded; finals are terminal for their span
    pub is_partial: bool,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Events a transcriber delivers through its sink
#[derive(Debug)]
pub enum TranscriberEvent {
    Fragment(TranscriptFragment),
    /// Transport error; the handle is terminal after this
    Error(String),
    /// The channel is gone, cleanly or not
    Closed,
}

/// Sink handed to [`Transcriber::open`]. Adapter tasks send into it; the
/// session actor owns the receiving side, which keeps all session-state
/// mutation inside the actor.
pub type TranscriberSink = mpsc::UnboundedSender<TranscriberEvent>;

/// Options for opening a transcription channel
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// BCP-47 language tag, e.g. `en-US`
    pub language: String,
    /// PCM sample rate in Hz
    pub sample_rate: u32,
}

/// A streaming transcription backend
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Open a long-lived transcription channel.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UpstreamUnavailable`] if the connection
    /// cannot be established.
    async fn open(
        &self,
        options: TranscribeOptions,
        sink: TranscriberSink,
    ) -> Result<Box<dyn TranscriberHandle>>;
}

/// Handle to an open transcription channel
pub trait TranscriberHandle: Send + Sync {
    /// Queue PCM samples for the provider. Non-blocking; frames pushed
    /// after close are dropped with a warning.
    fn push(&self, samples: &[i16]);

    /// Close the channel. Idempotent.
    fn close(&self);
}

/// A reply-generation backend
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generate a reply for the prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request or the
    /// response cannot be parsed.
    async fn respond(&self, prompt: &Prompt) -> Result<String>;
}

/// A speech-synthesis backend
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize the text, returning the complete audio buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis fails.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Bounded outbound frame queue shared by both streaming backends.
///
/// `push` never blocks: when the queue is full the oldest frame is dropped
/// with a warning, and frames pushed after close are discarded.
pub(crate) struct FrameQueue {
    frames: Mutex<VecDeque<Vec<i16>>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl FrameQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    pub(crate) fn push(&self, frame: Vec<i16>) {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("dropping audio frame pushed after transcriber close");
            return;
        }
        if let Ok(mut frames) = self.frames.lock() {
            if frames.len() >= self.capacity {
                frames.pop_front();
                tracing::warn!(
                    capacity = self.capacity,
                    "transcriber outbound queue full, dropping oldest frame"
                );
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Next frame, or `None` once closed and drained.
    pub(crate) async fn pop(&self) -> Option<Vec<i16>> {
        loop {
            if let Ok(mut frames) = self.frames.lock() {
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Convert PCM samples to little-endian bytes for the wire.
pub(crate) fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_round_trip_little_endian() {
        let bytes = samples_to_bytes(&[0, 1, -1, i16::MAX, i16::MIN]);
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[0..2], &[0x00, 0x00]);
        assert_eq!(&bytes[2..4], &[0x01, 0x00]);
        assert_eq!(&bytes[4..6], &[0xff, 0xff]);
    }

    #[tokio::test]
    async fn queue_drops_oldest_when_full() {
        let queue = FrameQueue::new(2);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);
        assert_eq!(queue.pop().await, Some(vec![2]));
        assert_eq!(queue.pop().await, Some(vec![3]));
    }

    #[tokio::test]
    async fn queue_pop_returns_none_after_close() {
        let queue = FrameQueue::new(4);
        queue.push(vec![1]);
        queue.close();
        assert_eq!(queue.pop().await, Some(vec![1]));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn push_after_close_is_dropped() {
        let queue = FrameQueue::new(4);
        queue.close();
        queue.push(vec![1]);
        assert_eq!(queue.pop().await, None);
    }
}
