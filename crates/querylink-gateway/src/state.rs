use std::sync::Arc;

use querylink_bridge::{QueryBridge, SessionManager};

use crate::responder::ChatResponder;

/// Shared application state for axum handlers.
pub struct AppState {
    pub bridge: Arc<QueryBridge>,
    pub sessions: Arc<SessionManager>,
    pub responder: Arc<dyn ChatResponder>,
}

impl AppState {
    pub fn new(bridge: Arc<QueryBridge>, responder: Arc<dyn ChatResponder>) -> Self {
        let sessions = Arc::new(SessionManager::new(bridge.clone()));
        Self {
            bridge,
            sessions,
            responder,
        }
    }
}
