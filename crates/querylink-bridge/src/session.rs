use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use querylink_core::error::{BridgeError, Result};
use querylink_core::protocol::StreamFrame;
use querylink_core::types::SessionId;

use crate::dispatcher::QueryBridge;

/// Scope of one streaming response: where its query requests go.
///
/// Cheap to clone; all clones share the same sink and liveness token. The
/// sink is an mpsc queue, so frames from concurrent senders never interleave.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    session_id: SessionId,
    thread_id: Option<String>,
    sink: mpsc::Sender<StreamFrame>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(
        session_id: SessionId,
        thread_id: Option<String>,
        sink: mpsc::Sender<StreamFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                session_id,
                thread_id,
                sink,
                cancel,
                started_at: Utc::now(),
            }),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.inner.thread_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// False once the response ended or the client hung up.
    pub fn is_active(&self) -> bool {
        !self.inner.cancel.is_cancelled() && !self.inner.sink.is_closed()
    }

    /// Push a frame to this session's browser connection.
    pub async fn send(&self, frame: StreamFrame) -> Result<()> {
        self.inner
            .sink
            .send(frame)
            .await
            .map_err(|_| BridgeError::SinkClosed {
                session_id: self.inner.session_id.to_string(),
            })
    }

    /// Resolves when the session is torn down.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    /// Token tied to this session's lifetime.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.inner.session_id)
            .field("thread_id", &self.inner.thread_id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub thread_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Tracks live streaming sessions and tears them down.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, SessionInfo>>,
    bridge: Arc<QueryBridge>,
}

impl SessionManager {
    pub fn new(bridge: Arc<QueryBridge>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            bridge,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionInfo>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session; the receiver is the body of the streaming response.
    pub fn begin(&self, thread_id: Option<String>) -> (SessionContext, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(self.bridge.config().sink_buffer);
        let ctx = SessionContext::new(SessionId::new(), thread_id, tx, CancellationToken::new());

        self.sessions().insert(
            ctx.session_id().clone(),
            SessionInfo {
                session_id: ctx.session_id().clone(),
                thread_id: ctx.thread_id().map(str::to_string),
                started_at: ctx.started_at(),
            },
        );
        info!(session_id = %ctx.session_id(), thread_id = ?ctx.thread_id(), "Session started");
        (ctx, rx)
    }

    /// End a session: mark it inactive and fail its residual queries.
    /// Returns how many queries were failed.
    pub fn end(&self, ctx: &SessionContext) -> usize {
        ctx.close();
        if self.sessions().remove(ctx.session_id()).is_none() {
            debug!(session_id = %ctx.session_id(), "Session already ended");
        }
        let failed = self.bridge.registry().fail_session(ctx.session_id());
        info!(
            session_id = %ctx.session_id(),
            residual_queries = failed,
            duration_ms = (Utc::now() - ctx.started_at()).num_milliseconds(),
            "Session ended"
        );
        failed
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions().len()
    }
}
