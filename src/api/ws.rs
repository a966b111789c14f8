//! Client WebSocket transport
//!
//! Each connection carries named JSON events in both directions. A
//! connection owns at most one live session; creating a new one shuts the
//! previous one down, and closing the socket destroys the session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::AppState;
use crate::audio::{AudioFrame, SAMPLE_RATE};
use crate::conversation::{Turn, HISTORY_WINDOW};
use crate::session::{
    session_id, spawn_session, SessionCommand, SessionContext, SessionHandle, SessionInfo,
};
use crate::{Error, Result};

/// Outbound event queue depth per connection
const OUTBOUND_QUEUE: usize = 64;

/// Inbound events from the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WsIncoming {
    /// Create a session for a user
    StartSession {
        user_id: String,
        #[serde(default)]
        language_code: Option<String>,
    },
    /// Enter processing mode
    StartProcessing { session_id: String },
    /// Leave processing mode; defaults to the connection's session
    StopProcessing {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// One frame of PCM audio
    AudioData {
        session_id: String,
        samples: Vec<i16>,
        #[serde(default)]
        sample_rate: Option<u32>,
        #[serde(default)]
        channels: Option<u16>,
    },
    /// Fetch the recent conversation window
    GetConversationHistory {
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Delete the user's conversation
    ClearConversation,
    /// Fetch aggregate store statistics
    GetConversationStats,
}

/// Outbound events to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WsOutgoing {
    /// Sent on connect
    Ready { message: String },
    SessionCreated {
        session_id: String,
        message: String,
    },
    ProcessingStarted { message: String },
    ProcessingStopped { message: String },
    /// Partial and final transcripts alike
    TranscriptionResult {
        transcript: String,
        confidence: f32,
        is_partial: bool,
        timestamp: i64,
    },
    AiResponse {
        response: String,
        transcript: String,
        timestamp: i64,
        confidence: f32,
        buffered_transcripts: bool,
    },
    AiResponseError { message: String, timestamp: i64 },
    AiInterrupted {
        timestamp: i64,
        interrupted_at: i64,
    },
    /// Complete synthesized audio for one reply, base64-encoded
    TtsAudio {
        audio_data: String,
        text: String,
        timestamp: i64,
    },
    TtsError { message: String, timestamp: i64 },
    TtsUnavailable { message: String, timestamp: i64 },
    TranscriptionError { message: String },
    ConversationHistory {
        history: Vec<Turn>,
        user_id: String,
        timestamp: i64,
    },
    ConversationCleared { user_id: String, timestamp: i64 },
    ConversationStats {
        conversation_count: usize,
        total_turns: usize,
        timestamp: i64,
    },
    ConversationError { message: String },
    /// Malformed input or unknown session
    Error { message: String },
}

/// Build the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsOutgoing>(OUTBOUND_QUEUE);

    // Forward session and handler events to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&event) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let _ = tx
        .send(WsOutgoing::Ready {
            message: "Connected to Parley gateway".to_string(),
        })
        .await;
    tracing::info!("client connected");

    let mut session: Option<SessionHandle> = None;

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                if let Err(e) = handle_message(&text, &state, &tx, &mut session).await {
                    let _ = tx
                        .send(WsOutgoing::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(handle) = session.take() {
        tracing::info!(session_id = %handle.info.id, "client disconnected, stopping session");
        let _ = handle.commands.send(SessionCommand::Shutdown).await;
    } else {
        tracing::info!("client disconnected");
    }
    send_task.abort();
}

/// Handle one inbound event
async fn handle_message(
    text: &str,
    state: &Arc<AppState>,
    tx: &mpsc::Sender<WsOutgoing>,
    session: &mut Option<SessionHandle>,
) -> Result<()> {
    let incoming: WsIncoming =
        serde_json::from_str(text).map_err(|e| Error::Transport(format!("invalid message: {e}")))?;

    match incoming {
        WsIncoming::StartSession {
            user_id,
            language_code,
        } => {
            if user_id.trim().is_empty() {
                return Err(Error::Transport("userId is required".to_string()));
            }
            // one live session per connection
            if let Some(previous) = session.take() {
                let _ = previous.commands.send(SessionCommand::Shutdown).await;
            }

            let language =
                language_code.unwrap_or_else(|| state.config.default_language.clone());
            let id = session_id(&user_id, chrono::Utc::now().timestamp_millis());
            let info = SessionInfo::new(id.clone(), user_id, language);
            let context = SessionContext {
                store: state.store.clone(),
                registry: state.registry.clone(),
                outbound: tx.clone(),
                transcriber: state.transcriber.clone(),
                responder: state.responder.clone(),
                synthesizer: state.synthesizer.clone(),
                min_final_confidence: state.config.min_final_confidence,
            };
            let handle = spawn_session(info, context).await;
            *session = Some(handle);

            send(
                tx,
                WsOutgoing::SessionCreated {
                    session_id: id,
                    message: "Session created".to_string(),
                },
            )
            .await?;
        }
        WsIncoming::StartProcessing { session_id } => {
            let handle = resolve(state, session, Some(&session_id)).await?;
            dispatch(&handle, SessionCommand::StartProcessing).await?;
        }
        WsIncoming::StopProcessing { session_id } => {
            let handle = resolve(state, session, session_id.as_deref()).await?;
            dispatch(&handle, SessionCommand::StopProcessing).await?;
        }
        WsIncoming::AudioData {
            session_id,
            samples,
            sample_rate,
            channels,
        } => {
            let handle = resolve(state, session, Some(&session_id)).await?;
            let frame = AudioFrame {
                timestamp: chrono::Utc::now().timestamp_millis(),
                samples,
                sample_rate: sample_rate.unwrap_or(SAMPLE_RATE),
                channels: channels.unwrap_or(1),
            };
            dispatch(&handle, SessionCommand::Frame(frame)).await?;
        }
        WsIncoming::GetConversationHistory { limit } => {
            let Some(handle) = session.as_ref() else {
                return conversation_error(tx).await;
            };
            let history = state
                .store
                .window(&handle.info.user_id, limit.unwrap_or(HISTORY_WINDOW))
                .await;
            send(
                tx,
                WsOutgoing::ConversationHistory {
                    history,
                    user_id: handle.info.user_id.clone(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            )
            .await?;
        }
        WsIncoming::ClearConversation => {
            let Some(handle) = session.as_ref() else {
                return conversation_error(tx).await;
            };
            state.store.clear(&handle.info.user_id).await;
            send(
                tx,
                WsOutgoing::ConversationCleared {
                    user_id: handle.info.user_id.clone(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            )
            .await?;
        }
        WsIncoming::GetConversationStats => {
            let stats = state.store.stats().await;
            send(
                tx,
                WsOutgoing::ConversationStats {
                    conversation_count: stats.conversation_count,
                    total_turns: stats.total_turns,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            )
            .await?;
        }
    }

    Ok(())
}

/// Resolve the target session: an explicit id must exist in the registry,
/// no id falls back to the connection's session.
async fn resolve(
    state: &Arc<AppState>,
    session: &Option<SessionHandle>,
    id: Option<&str>,
) -> Result<SessionHandle> {
    match id {
        Some(id) => state
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::SessionNotFound(id.to_string())),
        None => session
            .clone()
            .ok_or_else(|| Error::Transport("no active session".to_string())),
    }
}

async fn dispatch(handle: &SessionHandle, command: SessionCommand) -> Result<()> {
    handle
        .commands
        .send(command)
        .await
        .map_err(|_| Error::SessionNotFound(handle.info.id.clone()))
}

async fn send(tx: &mpsc::Sender<WsOutgoing>, event: WsOutgoing) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| Error::Transport("connection closed".to_string()))
}

async fn conversation_error(tx: &mpsc::Sender<WsOutgoing>) -> Result<()> {
    send(
        tx,
        WsOutgoing::ConversationError {
            message: "no active session".to_string(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_session_deserializes() {
        let json = r#"{"type":"start-session","userId":"u1","languageCode":"de-DE"}"#;
        let msg: WsIncoming = serde_json::from_str(json).unwrap();
        match msg {
            WsIncoming::StartSession {
                user_id,
                language_code,
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(language_code.as_deref(), Some("de-DE"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn audio_data_defaults_are_optional() {
        let json = r#"{"type":"audio-data","sessionId":"s1","samples":[0,1,-1]}"#;
        let msg: WsIncoming = serde_json::from_str(json).unwrap();
        match msg {
            WsIncoming::AudioData {
                session_id,
                samples,
                sample_rate,
                channels,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(samples, vec![0, 1, -1]);
                assert!(sample_rate.is_none());
                assert!(channels.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn stop_processing_session_id_is_optional() {
        let msg: WsIncoming = serde_json::from_str(r#"{"type":"stop-processing"}"#).unwrap();
        assert!(matches!(
            msg,
            WsIncoming::StopProcessing { session_id: None }
        ));
    }

    #[test]
    fn ai_response_serializes_with_camel_case_fields() {
        let event = WsOutgoing::AiResponse {
            response: "hi".to_string(),
            transcript: "hello".to_string(),
            timestamp: 42,
            confidence: 0.5,
            buffered_transcripts: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"ai-response\""));
        assert!(json.contains("\"bufferedTranscripts\":true"));
        assert!(json.contains("\"transcript\":\"hello\""));
    }

    #[test]
    fn transcription_result_serializes() {
        let event = WsOutgoing::TranscriptionResult {
            transcript: "hey".to_string(),
            confidence: 0.9,
            is_partial: true,
            timestamp: 7,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"transcription-result\""));
        assert!(json.contains("\"isPartial\":true"));
    }

    #[test]
    fn tts_audio_serializes() {
        let event = WsOutgoing::TtsAudio {
            audio_data: "QQ==".to_string(),
            text: "hello".to_string(),
            timestamp: 9,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"tts-audio\""));
        assert!(json.contains("\"audioData\":\"QQ==\""));
    }

    #[test]
    fn interrupted_serializes() {
        let event = WsOutgoing::AiInterrupted {
            timestamp: 10,
            interrupted_at: 5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"ai-interrupted\""));
        assert!(json.contains("\"interruptedAt\":5"));
    }
}
