use std::sync::Arc;

use querylink_core::error::{BridgeError, Result};
use querylink_core::protocol::StreamFrame;
use querylink_core::types::TabularResult;

use crate::dispatcher::QueryBridge;
use crate::session::SessionContext;

/// Handed down from the streaming endpoint to agent and tool code so any
/// of it can run SQL in the caller's browser without a global lookup.
#[derive(Clone)]
pub struct AnalysisContext {
    bridge: Arc<QueryBridge>,
    session: Option<SessionContext>,
}

impl AnalysisContext {
    pub fn new(bridge: Arc<QueryBridge>, session: SessionContext) -> Self {
        Self {
            bridge,
            session: Some(session),
        }
    }

    /// A context with no browser behind it (background jobs, CLI).
    /// Every query issued through it fails with `SessionNotActive`.
    pub fn detached(bridge: Arc<QueryBridge>) -> Self {
        Self {
            bridge,
            session: None,
        }
    }

    pub fn session(&self) -> Result<&SessionContext> {
        self.session.as_ref().ok_or(BridgeError::SessionNotActive)
    }

    pub async fn execute_query(
        &self,
        sql: impl Into<String>,
        params: Vec<serde_json::Value>,
    ) -> Result<TabularResult> {
        let session = self.session()?;
        self.bridge.execute_query(session, sql, params).await
    }

    /// Push a non-query frame (text, table, error) to the browser.
    pub async fn emit(&self, frame: StreamFrame) -> Result<()> {
        self.session()?.send(frame).await
    }
}
