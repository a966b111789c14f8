//! Streaming transcription over a JSON WebSocket
//!
//! PCM frames are base64-encoded into `input_audio_buffer.append` messages;
//! the provider runs its own voice activity detection and emits transcript
//! deltas and completions as separate events. The provider reports no
//! confidence, so finals carry 1.0 and partials 0.0.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{
    samples_to_bytes, FrameQueue, TranscribeOptions, Transcriber, TranscriberEvent,
    TranscriberHandle, TranscriberSink, TranscriptFragment, OUTBOUND_QUEUE_FRAMES,
};
use crate::{Error, Result};

const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime?intent=transcription";

/// Default realtime transcription model
pub const DEFAULT_TRANSCRIBE_MODEL: &str = "gpt-4o-mini-transcribe";

#[derive(Deserialize)]
struct RealtimeEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    error: Option<RealtimeError>,
}

#[derive(Deserialize)]
struct RealtimeError {
    #[serde(default)]
    message: String,
}

/// JSON realtime transcription backend
pub struct RealtimeTranscriber {
    api_key: String,
    model: String,
}

impl RealtimeTranscriber {
    /// Create the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing.
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for realtime transcription".to_string(),
            ));
        }
        Ok(Self { api_key, model })
    }
}

#[async_trait]
impl Transcriber for RealtimeTranscriber {
    async fn open(
        &self,
        options: TranscribeOptions,
        sink: TranscriberSink,
    ) -> Result<Box<dyn TranscriberHandle>> {
        let mut request = REALTIME_URL
            .into_client_request()
            .map_err(|e| Error::UpstreamUnavailable(format!("bad realtime URL: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| Error::Config(format!("invalid API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("transcriber connect failed: {e}")))?;
        tracing::info!(language = %options.language, "realtime transcription session opened");

        let (mut write, mut read) = socket.split();
        let queue = Arc::new(FrameQueue::new(OUTBOUND_QUEUE_FRAMES));

        let session_update = json!({
            "type": "transcription_session.update",
            "session": {
                "input_audio_format": "pcm16",
                "input_audio_transcription": {
                    "model": self.model,
                    "language": primary_subtag(&options.language),
                },
                "turn_detection": { "type": "server_vad" },
            },
        });

        let writer_queue = Arc::clone(&queue);
        tokio::spawn(async move {
            if write
                .send(Message::Text(session_update.to_string().into()))
                .await
                .is_err()
            {
                writer_queue.close();
                return;
            }
            while let Some(samples) = writer_queue.pop().await {
                let audio =
                    base64::engine::general_purpose::STANDARD.encode(samples_to_bytes(&samples));
                let append = json!({ "type": "input_audio_buffer.append", "audio": audio });
                if write
                    .send(Message::Text(append.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        let reader_queue = Arc::clone(&queue);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => forward_event(&text, &sink),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "realtime session error");
                        let _ = sink.send(TranscriberEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            reader_queue.close();
            let _ = sink.send(TranscriberEvent::Closed);
        });

        Ok(Box::new(RealtimeHandle { queue }))
    }
}

fn forward_event(text: &str, sink: &TranscriberSink) {
    let Ok(event) = serde_json::from_str::<RealtimeEvent>(text) else {
        return;
    };
    let now = chrono::Utc::now().timestamp_millis();
    match event.event_type.as_str() {
        "conversation.item.input_audio_transcription.delta" => {
            if let Some(delta) = event.delta.filter(|d| !d.is_empty()) {
                let _ = sink.send(TranscriberEvent::Fragment(TranscriptFragment {
                    text: delta,
                    confidence: 0.0,
                    is_partial: true,
                    timestamp: now,
                }));
            }
        }
        "conversation.item.input_audio_transcription.completed" => {
            if let Some(transcript) = event.transcript.filter(|t| !t.is_empty()) {
                let _ = sink.send(TranscriberEvent::Fragment(TranscriptFragment {
                    text: transcript,
                    confidence: 1.0,
                    is_partial: false,
                    timestamp: now,
                }));
            }
        }
        "error" => {
            let message = event.error.map_or_else(String::new, |e| e.message);
            tracing::warn!(error = %message, "realtime session reported error");
            let _ = sink.send(TranscriberEvent::Error(message));
        }
        _ => {}
    }
}

/// `en-US` → `en`; the realtime API takes bare ISO 639-1 codes.
fn primary_subtag(language: &str) -> &str {
    language.split('-').next().unwrap_or(language)
}

struct RealtimeHandle {
    queue: Arc<FrameQueue>,
}

impl TranscriberHandle for RealtimeHandle {
    fn push(&self, samples: &[i16]) {
        self.queue.push(samples.to_vec());
    }

    fn close(&self) {
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert!(RealtimeTranscriber::new(String::new(), "whisper-1".to_string()).is_err());
    }

    #[test]
    fn language_subtag_is_primary() {
        assert_eq!(primary_subtag("en-US"), "en");
        assert_eq!(primary_subtag("de"), "de");
    }

    #[test]
    fn delta_becomes_partial_fragment() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forward_event(
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"hel"}"#,
            &tx,
        );
        match rx.try_recv().unwrap() {
            TranscriberEvent::Fragment(f) => {
                assert_eq!(f.text, "hel");
                assert!(f.is_partial);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn completed_becomes_final_fragment() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forward_event(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello"}"#,
            &tx,
        );
        match rx.try_recv().unwrap() {
            TranscriberEvent::Fragment(f) => {
                assert_eq!(f.text, "hello");
                assert!(!f.is_partial);
                assert!((f.confidence - 1.0).abs() < f32::EPSILON);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_event_is_forwarded() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forward_event(r#"{"type":"error","error":{"message":"boom"}}"#, &tx);
        assert!(matches!(
            rx.try_recv().unwrap(),
            TranscriberEvent::Error(m) if m == "boom"
        ));
    }
}
