//! Shared test utilities
//!
//! Mock upstream adapters and a small harness that runs a real session
//! actor against them, without any network or audio hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_gateway::api::ws::WsOutgoing;
use parley_gateway::audio::AudioFrame;
use parley_gateway::conversation::ConversationStore;
use parley_gateway::session::{
    session_id, spawn_session, SessionCommand, SessionContext, SessionHandle, SessionInfo,
    SessionRegistry,
};
use parley_gateway::upstream::{
    Prompt, Responder, Synthesizer, TranscribeOptions, Transcriber, TranscriberEvent,
    TranscriberHandle, TranscriberSink, TranscriptFragment,
};
use parley_gateway::{Error, Result};

/// Transcriber that records opens and lets tests inject events
#[derive(Default)]
pub struct MockTranscriber {
    attempts: AtomicUsize,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    pushed_frames: Arc<AtomicUsize>,
    fail_next_open: AtomicBool,
    sinks: Mutex<Vec<TranscriberSink>>,
}

impl MockTranscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pushed_frames(&self) -> usize {
        self.pushed_frames.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    fn sink(&self, index: usize) -> TranscriberSink {
        self.sinks.lock().unwrap()[index].clone()
    }

    fn latest_sink(&self) -> TranscriberSink {
        self.sinks.lock().unwrap().last().expect("no open sink").clone()
    }

    pub fn emit_partial(&self, text: &str) {
        let _ = self
            .latest_sink()
            .send(TranscriberEvent::Fragment(fragment(text, 0.0, true)));
    }

    pub fn emit_final(&self, text: &str, confidence: f32) {
        let _ = self
            .latest_sink()
            .send(TranscriberEvent::Fragment(fragment(text, confidence, false)));
    }

    pub fn emit_final_to(&self, index: usize, text: &str, confidence: f32) {
        let _ = self
            .sink(index)
            .send(TranscriberEvent::Fragment(fragment(text, confidence, false)));
    }

    pub fn emit_error(&self, message: &str) {
        let sink = self.latest_sink();
        let _ = sink.send(TranscriberEvent::Error(message.to_string()));
        let _ = sink.send(TranscriberEvent::Closed);
    }
}

fn fragment(text: &str, confidence: f32, is_partial: bool) -> TranscriptFragment {
    TranscriptFragment {
        text: text.to_string(),
        confidence,
        is_partial,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn open(
        &self,
        _options: TranscribeOptions,
        sink: TranscriberSink,
    ) -> Result<Box<dyn TranscriberHandle>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(Error::UpstreamUnavailable("mock open failure".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().unwrap().push(sink);
        Ok(Box::new(MockTranscriberHandle {
            closes: Arc::clone(&self.closes),
            pushed_frames: Arc::clone(&self.pushed_frames),
        }))
    }
}

pub struct MockTranscriberHandle {
    closes: Arc<AtomicUsize>,
    pushed_frames: Arc<AtomicUsize>,
}

impl TranscriberHandle for MockTranscriberHandle {
    fn push(&self, _samples: &[i16]) {
        self.pushed_frames.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Responder that replies `reply to: <text>` after an optional delay
pub struct MockResponder {
    pub delay: Duration,
    fail: AtomicBool,
    canned: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockResponder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            fail: AtomicBool::new(false),
            canned: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail: AtomicBool::new(false),
            canned: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> Prompt {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn respond(&self, prompt: &Prompt) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(Error::Responder("mock responder failure".to_string()));
        }
        if let Some(canned) = self.canned.lock().unwrap().pop_front() {
            return Ok(canned);
        }
        Ok(format!("reply to: {}", prompt.user_text))
    }
}

/// Synthesizer returning `audio:<text>` bytes after an optional delay
pub struct MockSynthesizer {
    pub delay: Duration,
    synth_count: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            synth_count: AtomicUsize::new(0),
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            synth_count: AtomicUsize::new(0),
        })
    }

    pub fn synth_count(&self) -> usize {
        self.synth_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.synth_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("audio:{text}").into_bytes())
    }
}

/// A gateway-in-miniature: real store, registry, and session actors over
/// mock upstream adapters
pub struct TestGateway {
    pub registry: SessionRegistry,
    pub store: ConversationStore,
    pub transcriber: Arc<MockTranscriber>,
    pub responder: Arc<MockResponder>,
    pub synthesizer: Option<Arc<MockSynthesizer>>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self {
            registry: SessionRegistry::new(),
            store: ConversationStore::new(),
            transcriber: MockTranscriber::new(),
            responder: MockResponder::new(),
            synthesizer: Some(MockSynthesizer::new()),
        }
    }

    pub fn without_tts(mut self) -> Self {
        self.synthesizer = None;
        self
    }

    pub fn with_responder(mut self, responder: Arc<MockResponder>) -> Self {
        self.responder = responder;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<MockSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Spawn a session for `user_id`, returning its handle and the stream
    /// of events it emits to the transport.
    pub async fn session(&self, user_id: &str) -> (SessionHandle, mpsc::Receiver<WsOutgoing>) {
        let (tx, rx) = mpsc::channel(256);
        let info = SessionInfo::new(
            session_id(user_id, chrono::Utc::now().timestamp_millis()),
            user_id.to_string(),
            "en-US".to_string(),
        );
        let context = SessionContext {
            store: self.store.clone(),
            registry: self.registry.clone(),
            outbound: tx,
            transcriber: Some(Arc::clone(&self.transcriber) as Arc<dyn Transcriber>),
            responder: Some(Arc::clone(&self.responder) as Arc<dyn Responder>),
            synthesizer: self
                .synthesizer
                .as_ref()
                .map(|s| Arc::clone(s) as Arc<dyn Synthesizer>),
            min_final_confidence: 0.0,
        };
        let handle = spawn_session(info, context).await;
        (handle, rx)
    }
}

/// A frame loud enough to classify as voice
pub fn voice_frame(timestamp: i64) -> AudioFrame {
    AudioFrame {
        timestamp,
        samples: vec![6_000; 1024],
        sample_rate: 16_000,
        channels: 1,
    }
}

/// A silent frame
pub fn silence_frame(timestamp: i64) -> AudioFrame {
    AudioFrame {
        timestamp,
        samples: vec![0; 1024],
        sample_rate: 16_000,
        channels: 1,
    }
}

pub async fn send(handle: &SessionHandle, command: SessionCommand) {
    handle.commands.send(command).await.expect("session gone");
}

/// Next event, waiting up to 30 s of (virtual) time
pub async fn recv_event(rx: &mut mpsc::Receiver<WsOutgoing>) -> WsOutgoing {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one matches
pub async fn recv_matching(
    rx: &mut mpsc::Receiver<WsOutgoing>,
    pred: impl Fn(&WsOutgoing) -> bool,
) -> WsOutgoing {
    loop {
        let event = recv_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Collect every event arriving within `ms` of (virtual) time
pub async fn drain_for(rx: &mut mpsc::Receiver<WsOutgoing>, ms: u64) -> Vec<WsOutgoing> {
    let mut events = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_millis(ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = rx.recv() => match event {
                Some(event) => events.push(event),
                None => break,
            },
        }
    }
    events
}

/// Poll until a condition holds, advancing virtual time in small steps
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..4_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
