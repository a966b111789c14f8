//! Per-frame audio analysis

/// Volume above which a frame counts as voice, on the 0-100 scale
pub const VOICE_VOLUME_THRESHOLD: u8 = 5;

/// One frame of PCM audio from a session
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Wall-clock arrival time, epoch milliseconds
    pub timestamp: i64,
    /// Signed 16-bit PCM samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

/// Result of analyzing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisResult {
    /// RMS volume scaled to 0-100
    pub volume: u8,
    /// Whether the frame counts as voice
    pub voice_active: bool,
}

/// Analyze one frame of PCM samples.
///
/// Volume is the RMS of the samples relative to full scale, as a clamped
/// 0-100 integer. An empty frame yields volume 0 and no voice.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn analyze(frame: &AudioFrame) -> AnalysisResult {
    if frame.samples.is_empty() {
        return AnalysisResult {
            volume: 0,
            voice_active: false,
        };
    }

    let sum_squares: f64 = frame
        .samples
        .iter()
        .map(|s| {
            let s = f64::from(*s);
            s * s
        })
        .sum();
    let rms = (sum_squares / frame.samples.len() as f64).sqrt();

    let volume = ((rms / f64::from(i16::MAX)) * 100.0).round().clamp(0.0, 100.0) as u8;

    AnalysisResult {
        volume,
        voice_active: volume > VOICE_VOLUME_THRESHOLD,
    }
}
