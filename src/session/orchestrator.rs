//! Per-session orchestration
//!
//! One actor task per session owns the voice activity tracker, the turn
//! buffer, the transcriber handle, and the in-flight reply and synthesis
//! tasks. Everything that touches session state flows through the command
//! channel, including timer firings and task completions, which keeps the
//! session serialized without locks.
//!
//! Reply and synthesis run as spawned tasks reporting back with a
//! generation number. Cancellation aborts the task and bumps the
//! generation; a completion that raced the abort arrives with a stale
//! generation and is discarded, so a cancelled reply can never reach the
//! conversation or the transport.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::ws::WsOutgoing;
use crate::audio::{
    analyze, AudioFrame, VadDecision, VoiceActivity, SAMPLE_RATE, SILENCE_TIMEOUT_MS,
};
use crate::conversation::{ConversationStore, Role, Turn, PROMPT_WINDOW};
use crate::upstream::{
    Prompt, Responder, Synthesizer, TranscribeOptions, Transcriber, TranscriberEvent,
    TranscriberHandle, TranscriptFragment, FALLBACK_REPLY,
};
use crate::{Error, Result};

use super::registry::{SessionHandle, SessionInfo, SessionRegistry};
use super::turn::{DrainedTurn, TurnBuffer, INACTIVITY_TIMEOUT_MS};
use super::SessionCommand;

/// Command queue depth per session
const COMMAND_QUEUE: usize = 256;

/// Everything a session actor needs from the surrounding process
pub struct SessionContext {
    pub store: ConversationStore,
    pub registry: SessionRegistry,
    /// Events destined for this session's client
    pub outbound: mpsc::Sender<WsOutgoing>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub responder: Option<Arc<dyn Responder>>,
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    /// Minimum confidence for a final fragment to enter the turn buffer
    pub min_final_confidence: f32,
}

/// Spawn a session actor and register it. The returned handle is the only
/// way to reach the session.
pub async fn spawn_session(info: Arc<SessionInfo>, ctx: SessionContext) -> SessionHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = SessionHandle {
        info: Arc::clone(&info),
        commands: tx.clone(),
    };
    ctx.registry.insert(handle.clone()).await;

    let orchestrator = Orchestrator {
        info,
        ctx,
        commands: rx,
        self_tx: tx,
        vad: VoiceActivity::new(),
        buffer: TurnBuffer::new(),
        transcriber: None,
        transcriber_events: None,
        silence_generation: 0,
        inactivity_generation: 0,
        reply_generation: 0,
        synth_generation: 0,
        reply_task: None,
        synth_task: None,
        tts_unavailable_reported: false,
        pending_stop: false,
    };
    tokio::spawn(orchestrator.run());

    handle
}

struct TaskSlot {
    handle: JoinHandle<()>,
    /// Epoch milliseconds, reported in `ai-interrupted`
    started_at: i64,
}

struct Orchestrator {
    info: Arc<SessionInfo>,
    ctx: SessionContext,
    commands: mpsc::Receiver<SessionCommand>,
    /// Cloned into timers and reply/synth tasks so completions re-enter
    /// the serialized context
    self_tx: mpsc::Sender<SessionCommand>,
    vad: VoiceActivity,
    buffer: TurnBuffer,
    transcriber: Option<Box<dyn TranscriberHandle>>,
    transcriber_events: Option<mpsc::UnboundedReceiver<TranscriberEvent>>,
    silence_generation: u64,
    inactivity_generation: u64,
    reply_generation: u64,
    synth_generation: u64,
    reply_task: Option<TaskSlot>,
    synth_task: Option<TaskSlot>,
    /// `tts-unavailable` is emitted at most once per turn
    tts_unavailable_reported: bool,
    /// A stop-processing is waiting for its flush reply to resolve
    pending_stop: bool,
}

impl Orchestrator {
    async fn run(mut self) {
        tracing::info!(
            session_id = %self.info.id,
            user_id = %self.info.user_id,
            language = %self.info.language,
            "session started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = next_event(&mut self.transcriber_events) => {
                    self.handle_transcriber_event(event).await;
                }
            }
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Frame(frame) => self.on_frame(frame).await,
            SessionCommand::StartProcessing => self.on_start_processing().await,
            SessionCommand::StopProcessing => self.on_stop_processing().await,
            SessionCommand::SilenceElapsed { generation } => {
                self.on_silence_elapsed(generation).await;
            }
            SessionCommand::InactivityElapsed { generation } => {
                if generation == self.inactivity_generation {
                    self.flush_turn().await;
                }
            }
            SessionCommand::ReplyFinished {
                generation,
                result,
                transcript,
                confidence,
            } => {
                self.on_reply_finished(generation, result, transcript, confidence)
                    .await;
            }
            SessionCommand::SynthFinished {
                generation,
                result,
                text,
            } => self.on_synth_finished(generation, result, text).await,
            SessionCommand::Shutdown => {}
        }
    }

    // -- frames and voice activity --

    async fn on_frame(&mut self, frame: AudioFrame) {
        if !self.info.is_processing() {
            return;
        }
        let analysis = analyze(&frame);
        match self.vad.step(frame.timestamp, analysis.voice_active) {
            VadDecision::StartTranscription => self.open_transcriber().await,
            VadDecision::ArmSilenceTimer => self.arm_silence_timer(),
            VadDecision::CancelSilenceTimer => {
                self.silence_generation += 1;
            }
            VadDecision::StopTranscription | VadDecision::None => {}
        }
        if let Some(handle) = &self.transcriber {
            handle.push(&frame.samples);
        }
    }

    async fn open_transcriber(&mut self) {
        if self.transcriber.is_some() {
            return;
        }
        let Some(backend) = self.ctx.transcriber.clone() else {
            // no STT credential: audio keeps driving the tracker only
            self.vad.mark_transcription_stopped();
            return;
        };
        let (sink, events) = mpsc::unbounded_channel();
        let options = TranscribeOptions {
            language: self.info.language.clone(),
            sample_rate: SAMPLE_RATE,
        };
        match backend.open(options, sink).await {
            Ok(handle) => {
                self.transcriber = Some(handle);
                self.transcriber_events = Some(events);
                self.info.transcribing.store(true, Ordering::Release);
            }
            Err(e) => {
                tracing::warn!(session_id = %self.info.id, error = %e, "transcriber open failed");
                self.vad.mark_transcription_stopped();
            }
        }
    }

    fn close_transcriber(&mut self) {
        if let Some(handle) = self.transcriber.take() {
            handle.close();
        }
        self.transcriber_events = None;
        self.info.transcribing.store(false, Ordering::Release);
        self.silence_generation += 1;
    }

    fn arm_silence_timer(&mut self) {
        self.silence_generation += 1;
        let generation = self.silence_generation;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SILENCE_TIMEOUT_MS)).await;
            let _ = tx.send(SessionCommand::SilenceElapsed { generation }).await;
        });
    }

    async fn on_silence_elapsed(&mut self, generation: u64) {
        if generation != self.silence_generation {
            return;
        }
        if self.vad.silence_elapsed() == VadDecision::StopTranscription {
            // buffered fragments become a turn now instead of waiting out
            // the inactivity timer
            self.flush_turn().await;
            self.close_transcriber();
        }
    }

    // -- transcripts --

    async fn handle_transcriber_event(&mut self, event: TranscriberEvent) {
        match event {
            TranscriberEvent::Fragment(fragment) => {
                self.emit(WsOutgoing::TranscriptionResult {
                    transcript: fragment.text.clone(),
                    confidence: fragment.confidence,
                    is_partial: fragment.is_partial,
                    timestamp: fragment.timestamp,
                })
                .await;
                if !fragment.is_partial {
                    self.on_final_fragment(fragment).await;
                }
            }
            TranscriberEvent::Error(message) => {
                tracing::warn!(session_id = %self.info.id, error = %message, "transcriber error");
                self.emit(WsOutgoing::TranscriptionError { message }).await;
                // implicit stop; the next speech burst opens a fresh channel
                self.close_transcriber();
                self.vad.mark_transcription_stopped();
            }
            TranscriberEvent::Closed => {
                if let Some(handle) = self.transcriber.take() {
                    handle.close();
                }
                self.transcriber_events = None;
                self.info.transcribing.store(false, Ordering::Release);
                self.vad.mark_transcription_stopped();
            }
        }
    }

    async fn on_final_fragment(&mut self, fragment: TranscriptFragment) {
        if !self.info.is_processing() {
            // the transcriber is winding down; late finals no longer batch
            return;
        }
        if fragment.text.trim().is_empty() {
            return;
        }
        if fragment.confidence < self.ctx.min_final_confidence {
            tracing::debug!(
                confidence = fragment.confidence,
                "dropping final below confidence threshold"
            );
            return;
        }

        // Barge-in: fresh user speech cancels the in-flight reply and audio
        // before the fragment enters the buffer.
        if self.reply_task.is_some() || self.synth_task.is_some() {
            let interrupted_at = self.cancel_reply_and_synth().unwrap_or_else(now_ms);
            tracing::info!(session_id = %self.info.id, "reply interrupted by new speech");
            self.emit(WsOutgoing::AiInterrupted {
                timestamp: now_ms(),
                interrupted_at,
            })
            .await;
        }

        self.buffer.push(fragment);
        self.arm_inactivity_timer();
    }

    fn arm_inactivity_timer(&mut self) {
        self.inactivity_generation += 1;
        let generation = self.inactivity_generation;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(INACTIVITY_TIMEOUT_MS)).await;
            let _ = tx
                .send(SessionCommand::InactivityElapsed { generation })
                .await;
        });
    }

    // -- turns and replies --

    async fn flush_turn(&mut self) {
        self.inactivity_generation += 1;
        let Some(turn) = self.buffer.drain() else {
            if self.pending_stop {
                self.finish_stop().await;
            }
            return;
        };

        tracing::info!(
            session_id = %self.info.id,
            fragments = turn.fragment_count,
            mean_confidence = turn.mean_confidence,
            "user turn complete"
        );

        let history = self
            .ctx
            .store
            .window(&self.info.user_id, PROMPT_WINDOW)
            .await;
        self.ctx
            .store
            .append(&self.info.user_id, Role::User, &turn.text)
            .await;
        self.launch_reply(turn, history);
    }

    fn launch_reply(&mut self, turn: DrainedTurn, history: Vec<Turn>) {
        self.reply_generation += 1;
        let generation = self.reply_generation;
        self.tts_unavailable_reported = false;

        let responder = self.ctx.responder.clone();
        let tx = self.self_tx.clone();
        let prompt = Prompt {
            history,
            user_text: turn.text.clone(),
        };
        let transcript = turn.text;
        let confidence = turn.mean_confidence;

        let handle = tokio::spawn(async move {
            let result = match responder {
                Some(responder) => responder.respond(&prompt).await,
                None => Ok(FALLBACK_REPLY.to_string()),
            };
            let _ = tx
                .send(SessionCommand::ReplyFinished {
                    generation,
                    result,
                    transcript,
                    confidence,
                })
                .await;
        });
        self.reply_task = Some(TaskSlot {
            handle,
            started_at: now_ms(),
        });
    }

    async fn on_reply_finished(
        &mut self,
        generation: u64,
        result: Result<String>,
        transcript: String,
        confidence: f32,
    ) {
        if generation != self.reply_generation {
            tracing::debug!(session_id = %self.info.id, "discarding reply for a cancelled turn");
            return;
        }
        self.reply_task = None;

        match result {
            Ok(text) => {
                self.ctx
                    .store
                    .append(&self.info.user_id, Role::Assistant, &text)
                    .await;
                self.emit(WsOutgoing::AiResponse {
                    response: text.clone(),
                    transcript,
                    timestamp: now_ms(),
                    confidence,
                    buffered_transcripts: true,
                })
                .await;
                if !self.pending_stop {
                    self.launch_synth(text).await;
                }
            }
            Err(e) => {
                tracing::error!(session_id = %self.info.id, error = %e, "reply generation failed");
                self.emit(WsOutgoing::AiResponseError {
                    message: "Sorry, I couldn't come up with a response.".to_string(),
                    timestamp: now_ms(),
                })
                .await;
            }
        }

        if self.pending_stop {
            self.finish_stop().await;
        }
    }

    // -- synthesis --

    async fn launch_synth(&mut self, text: String) {
        if self.synth_task.is_some() {
            return;
        }
        let Some(synthesizer) = self.ctx.synthesizer.clone() else {
            if !self.tts_unavailable_reported {
                self.tts_unavailable_reported = true;
                self.emit(WsOutgoing::TtsUnavailable {
                    message: "Speech synthesis is not configured.".to_string(),
                    timestamp: now_ms(),
                })
                .await;
            }
            return;
        };

        self.synth_generation += 1;
        let generation = self.synth_generation;
        let tx = self.self_tx.clone();
        let handle = tokio::spawn(async move {
            let result = synthesizer.synthesize(&text).await;
            let _ = tx
                .send(SessionCommand::SynthFinished {
                    generation,
                    result,
                    text,
                })
                .await;
        });
        self.synth_task = Some(TaskSlot {
            handle,
            started_at: now_ms(),
        });
    }

    async fn on_synth_finished(&mut self, generation: u64, result: Result<Vec<u8>>, text: String) {
        if generation != self.synth_generation {
            tracing::debug!(session_id = %self.info.id, "discarding audio for a cancelled turn");
            return;
        }
        self.synth_task = None;

        match result {
            Ok(audio) => {
                let audio_data = base64::engine::general_purpose::STANDARD.encode(&audio);
                self.emit(WsOutgoing::TtsAudio {
                    audio_data,
                    text,
                    timestamp: now_ms(),
                })
                .await;
            }
            Err(Error::UpstreamUnavailable(message)) => {
                if !self.tts_unavailable_reported {
                    self.tts_unavailable_reported = true;
                    self.emit(WsOutgoing::TtsUnavailable {
                        message,
                        timestamp: now_ms(),
                    })
                    .await;
                }
            }
            Err(e) => {
                tracing::error!(session_id = %self.info.id, error = %e, "synthesis failed");
                self.emit(WsOutgoing::TtsError {
                    message: e.to_string(),
                    timestamp: now_ms(),
                })
                .await;
            }
        }
    }

    // -- processing lifecycle --

    async fn on_start_processing(&mut self) {
        if self.pending_stop {
            self.finish_stop().await;
        }
        self.info.processing.store(true, Ordering::Release);
        self.buffer.clear();
        self.inactivity_generation += 1;
        self.vad.reset();
        self.close_transcriber();
        self.emit(WsOutgoing::ProcessingStarted {
            message: "Audio processing started".to_string(),
        })
        .await;
    }

    async fn on_stop_processing(&mut self) {
        if self.pending_stop {
            return;
        }
        if !self.info.is_processing() {
            tracing::debug!(session_id = %self.info.id, "stop-processing while already stopped");
            return;
        }
        self.info.processing.store(false, Ordering::Release);
        self.cancel_reply_and_synth();

        if self.buffer.is_empty() {
            self.finish_stop().await;
        } else {
            // the buffered turn gets its reply before processing-stopped
            self.pending_stop = true;
            self.flush_turn().await;
        }
    }

    async fn finish_stop(&mut self) {
        self.pending_stop = false;
        self.close_transcriber();
        self.vad.reset();
        self.inactivity_generation += 1;
        self.emit(WsOutgoing::ProcessingStopped {
            message: "Audio processing stopped".to_string(),
        })
        .await;
    }

    // -- cancellation and teardown --

    /// Abort any live reply and synthesis tasks. Returns the earliest start
    /// timestamp among the cancelled tasks.
    fn cancel_reply_and_synth(&mut self) -> Option<i64> {
        let mut earliest = None;
        if let Some(slot) = self.reply_task.take() {
            slot.handle.abort();
            self.reply_generation += 1;
            earliest = Some(slot.started_at);
        }
        if let Some(slot) = self.synth_task.take() {
            slot.handle.abort();
            self.synth_generation += 1;
            earliest = Some(earliest.map_or(slot.started_at, |e: i64| e.min(slot.started_at)));
        }
        earliest
    }

    async fn teardown(&mut self) {
        // a drained utterance was final speech; record it even though no
        // reply can be delivered anymore
        if let Some(turn) = self.buffer.drain() {
            self.ctx
                .store
                .append(&self.info.user_id, Role::User, &turn.text)
                .await;
        }
        self.cancel_reply_and_synth();
        if let Some(handle) = self.transcriber.take() {
            handle.close();
        }
        self.transcriber_events = None;
        self.info.transcribing.store(false, Ordering::Release);
        self.info.processing.store(false, Ordering::Release);
        self.ctx.registry.remove(&self.info.id).await;
        tracing::info!(session_id = %self.info.id, "session destroyed");
    }

    async fn emit(&self, event: WsOutgoing) {
        if self.ctx.outbound.send(event).await.is_err() {
            tracing::debug!(session_id = %self.info.id, "transport gone, dropping event");
        }
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TranscriberEvent>>,
) -> TranscriberEvent {
    match events {
        Some(rx) => rx.recv().await.unwrap_or(TranscriberEvent::Closed),
        None => std::future::pending().await,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
