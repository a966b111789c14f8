//! Parley Gateway - real-time conversational voice gateway
//!
//! Clients stream PCM audio over a WebSocket; the gateway detects speech,
//! transcribes it through a streaming speech provider, batches transcripts
//! into user turns, generates a reply through an LLM provider, synthesizes
//! the reply, and streams the audio back. A user speaking over the
//! assistant cancels the in-flight reply and synthesis.
//!
//! # Architecture
//!
//! ```text
//! client audio ──▶ session orchestrator ──▶ analyzer ──▶ voice activity
//!                        │                                    │
//!                        ▼                   start/stop decisions
//!                  transcriber ◀──────────────────────────────┘
//!                        │ final transcripts
//!                        ▼
//!                   turn buffer ──▶ responder ──▶ synthesizer ──▶ client
//! ```
//!
//! Each session runs as one tokio task; distinct sessions are independent.

pub mod api;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
