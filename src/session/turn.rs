//! Turn batching
//!
//! Final transcript fragments accumulate here until the inactivity timer
//! fires or a flush is forced; the drained batch becomes one user turn.

use crate::upstream::TranscriptFragment;

/// Inactivity gap after the last final fragment before a turn completes
pub const INACTIVITY_TIMEOUT_MS: u64 = 2_000;

/// A completed user turn drained from the buffer
#[derive(Debug, Clone)]
pub struct DrainedTurn {
    /// Fragment texts trimmed and joined with single spaces
    pub text: String,
    /// Mean fragment confidence, for telemetry
    pub mean_confidence: f32,
    pub fragment_count: usize,
}

/// Ordered batch of final fragments for the turn in progress
#[derive(Debug, Default)]
pub struct TurnBuffer {
    fragments: Vec<TranscriptFragment>,
}

impl TurnBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: TranscriptFragment) {
        self.fragments.push(fragment);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    /// Drain the buffer into one turn. Returns `None` when the buffer is
    /// empty or holds only whitespace.
    #[allow(clippy::cast_precision_loss)]
    pub fn drain(&mut self) -> Option<DrainedTurn> {
        if self.fragments.is_empty() {
            return None;
        }
        let fragments = std::mem::take(&mut self.fragments);

        let text = fragments
            .iter()
            .map(|f| f.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            return None;
        }

        let mean_confidence =
            fragments.iter().map(|f| f.confidence).sum::<f32>() / fragments.len() as f32;

        Some(DrainedTurn {
            text,
            mean_confidence,
            fragment_count: fragments.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str, confidence: f32) -> TranscriptFragment {
        TranscriptFragment {
            text: text.to_string(),
            confidence,
            is_partial: false,
            timestamp: 0,
        }
    }

    #[test]
    fn empty_buffer_drains_to_none() {
        let mut buffer = TurnBuffer::new();
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn fragments_join_with_single_spaces() {
        let mut buffer = TurnBuffer::new();
        buffer.push(fragment("  hello ", 0.9));
        buffer.push(fragment("world", 0.7));
        let turn = buffer.drain().unwrap();
        assert_eq!(turn.text, "hello world");
        assert_eq!(turn.fragment_count, 2);
        assert!((turn.mean_confidence - 0.8).abs() < 1e-6);
        assert!(buffer.is_empty());
    }

    #[test]
    fn whitespace_only_fragments_drain_to_none() {
        let mut buffer = TurnBuffer::new();
        buffer.push(fragment("   ", 0.5));
        buffer.push(fragment("", 0.5));
        assert!(buffer.drain().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_confidence_fragments_are_kept() {
        let mut buffer = TurnBuffer::new();
        buffer.push(fragment("yes", 0.0));
        let turn = buffer.drain().unwrap();
        assert_eq!(turn.text, "yes");
        assert!(turn.mean_confidence.abs() < f32::EPSILON);
    }
}
