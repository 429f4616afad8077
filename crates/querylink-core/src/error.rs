use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    // Query lifecycle errors
    #[error("Query timed out after {timeout_secs}s: {query_id}")]
    Timeout { query_id: String, timeout_secs: u64 },

    #[error("No active session context to dispatch the query on")]
    SessionNotActive,

    #[error("Browser reported query error: {0}")]
    BrowserReported(String),

    #[error("Correlation id already registered: {0}")]
    RegistryCollision(String),

    #[error("Query cancelled: {0}")]
    Cancelled(String),

    #[error("Malformed query result: {0}")]
    MalformedResult(String),

    #[error("Query has {count} parameters, limit is {limit}")]
    TooManyParams { count: usize, limit: usize },

    // Session errors
    #[error("Session ended before the query completed: {session_id}")]
    SessionEnded { session_id: String },

    #[error("Session output sink closed: {session_id}")]
    SinkClosed { session_id: String },

    #[error("Bridge shutting down: {0}")]
    Shutdown(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// Plain-language explanation suitable for showing in the chat transcript.
    pub fn user_message(&self) -> String {
        match self {
            BridgeError::Timeout { timeout_secs, .. } => format!(
                "The analysis timed out: the browser did not return query results within {} seconds. \
                 Please try again, or ask a narrower question.",
                timeout_secs
            ),
            BridgeError::BrowserReported(msg) => {
                format!("The query failed while running in your browser: {}", msg)
            }
            BridgeError::MalformedResult(_) => {
                "The browser returned results in an unexpected shape, so the analysis could not be completed."
                    .to_string()
            }
            BridgeError::SessionNotActive
            | BridgeError::SessionEnded { .. }
            | BridgeError::SinkClosed { .. } => {
                "The connection to your browser was lost before the analysis finished.".to_string()
            }
            BridgeError::Shutdown(_) => {
                "The server is restarting, so the analysis was interrupted. Please try again shortly."
                    .to_string()
            }
            BridgeError::TooManyParams { count, limit } => format!(
                "The query needed {} parameters, but at most {} are allowed. Try a narrower question.",
                count, limit
            ),
            BridgeError::Cancelled(_) => "The analysis was cancelled.".to_string(),
            other => format!("The analysis could not be completed: {}", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
