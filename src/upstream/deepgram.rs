//! Streaming transcription over a persistent WebSocket byte stream
//!
//! PCM frames go to the provider as binary messages; recognition results
//! come back as JSON. The provider is told the exact encoding up front, so
//! no container format is involved.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{
    samples_to_bytes, FrameQueue, TranscribeOptions, Transcriber, TranscriberEvent,
    TranscriberHandle, TranscriberSink, TranscriptFragment, OUTBOUND_QUEUE_FRAMES,
};
use crate::{Error, Result};

const LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Default streaming recognition model
pub const DEFAULT_LISTEN_MODEL: &str = "nova-2";

/// Recognition result frame
#[derive(Deserialize)]
struct ListenResult {
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    channel: Option<ListenChannel>,
}

#[derive(Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Byte-stream transcription backend
pub struct DeepgramTranscriber {
    api_key: String,
    model: String,
}

impl DeepgramTranscriber {
    /// Create the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing.
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "Deepgram API key required for streaming transcription".to_string(),
            ));
        }
        Ok(Self { api_key, model })
    }

    fn listen_url(&self, options: &TranscribeOptions) -> String {
        format!(
            "{LISTEN_URL}?model={}&language={}&encoding=linear16&sample_rate={}&channels=1&interim_results=true&punctuate=true",
            self.model, options.language, options.sample_rate
        )
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn open(
        &self,
        options: TranscribeOptions,
        sink: TranscriberSink,
    ) -> Result<Box<dyn TranscriberHandle>> {
        let url = self.listen_url(&options);
        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| Error::UpstreamUnavailable(format!("bad listen URL: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|e| Error::Config(format!("invalid API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("transcriber connect failed: {e}")))?;
        tracing::info!(language = %options.language, "transcription stream opened");

        let (mut write, mut read) = socket.split();
        let queue = Arc::new(FrameQueue::new(OUTBOUND_QUEUE_FRAMES));

        // Writer: drain the frame queue into binary messages, then tell the
        // provider the stream is done.
        let writer_queue = Arc::clone(&queue);
        tokio::spawn(async move {
            while let Some(samples) = writer_queue.pop().await {
                let bytes = samples_to_bytes(&samples);
                if write.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            let _ = write
                .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                .await;
            let _ = write.send(Message::Close(None)).await;
        });

        // Reader: forward recognition results into the session's sink.
        let reader_queue = Arc::clone(&queue);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        forward_result(&text, &sink);
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "transcription stream error");
                        let _ = sink.send(TranscriberEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            reader_queue.close();
            let _ = sink.send(TranscriberEvent::Closed);
        });

        Ok(Box::new(StreamHandle { queue }))
    }
}

fn forward_result(text: &str, sink: &TranscriberSink) {
    let Ok(result) = serde_json::from_str::<ListenResult>(text) else {
        tracing::trace!("ignoring non-result frame");
        return;
    };
    let Some(alternative) = result
        .channel
        .as_ref()
        .and_then(|c| c.alternatives.first())
    else {
        return;
    };
    if alternative.transcript.is_empty() {
        return;
    }
    let _ = sink.send(TranscriberEvent::Fragment(TranscriptFragment {
        text: alternative.transcript.clone(),
        confidence: alternative.confidence,
        is_partial: !result.is_final,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }));
}

struct StreamHandle {
    queue: Arc<FrameQueue>,
}

impl TranscriberHandle for StreamHandle {
    fn push(&self, samples: &[i16]) {
        self.queue.push(samples.to_vec());
    }

    fn close(&self) {
        if !self.queue.is_closed() {
            tracing::debug!("closing transcription stream");
        }
        self.queue.close();
    }
}
