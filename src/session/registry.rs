//! Process-wide session registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::SessionCommand;

/// Shared per-session metadata, kept current by the session's actor and
/// read by the HTTP surface
#[derive(Debug)]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub language: String,
    /// Epoch milliseconds
    pub created_at: i64,
    pub processing: AtomicBool,
    pub transcribing: AtomicBool,
}

impl SessionInfo {
    #[must_use]
    pub fn new(id: String, user_id: String, language: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            user_id,
            language,
            created_at: chrono::Utc::now().timestamp_millis(),
            processing: AtomicBool::new(false),
            transcribing: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_transcribing(&self) -> bool {
        self.transcribing.load(Ordering::Acquire)
    }
}

/// Address of a live session: its metadata plus its command channel
#[derive(Clone)]
pub struct SessionHandle {
    pub info: Arc<SessionInfo>,
    pub commands: mpsc::Sender<SessionCommand>,
}

/// Registry of live sessions, created at server start and shared with the
/// transport and HTTP surfaces
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SessionHandle) {
        let id = handle.info.id.clone();
        self.inner.write().await.insert(id.clone(), handle);
        tracing::debug!(session_id = %id, "session registered");
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<SessionHandle> {
        let removed = self.inner.write().await.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "session deregistered");
        }
        removed
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn active_transcriptions(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|h| h.info.is_transcribing())
            .count()
    }

    /// Metadata for every live session, oldest first.
    pub async fn snapshot(&self) -> Vec<Arc<SessionInfo>> {
        let mut sessions: Vec<Arc<SessionInfo>> = self
            .inner
            .read()
            .await
            .values()
            .map(|h| Arc::clone(&h.info))
            .collect();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }
}
