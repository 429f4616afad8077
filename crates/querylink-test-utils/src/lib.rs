//! Fixtures shared by gateway and integration tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use querylink_bridge::{QueryBridge, SessionContext};
use querylink_core::config::BridgeConfig;
use querylink_core::protocol::{QueryRequestEvent, StreamFrame};
use querylink_core::types::{SessionId, TabularResult};

/// Bridge with the given callback window. Panics on a zero window.
pub fn test_bridge(timeout_secs: u64) -> Arc<QueryBridge> {
    let bridge = QueryBridge::new(BridgeConfig {
        query_timeout_secs: timeout_secs,
        ..BridgeConfig::default()
    })
    .expect("test bridge config must be valid");
    Arc::new(bridge)
}

/// Session whose sink is an in-memory channel the test reads from.
pub fn test_session() -> (SessionContext, mpsc::Receiver<StreamFrame>) {
    let (tx, rx) = mpsc::channel(32);
    let ctx = SessionContext::new(
        SessionId::new(),
        Some("test-thread".to_string()),
        tx,
        CancellationToken::new(),
    );
    (ctx, rx)
}

/// `{columns: ["a"], values: [[1], [2]]}`
pub fn sample_result() -> TabularResult {
    TabularResult::new(vec!["a".to_string()], vec![vec![json!(1)], vec![json!(2)]])
}

/// Wait for the next query-request frame, skipping any other frames.
pub async fn next_query_request(rx: &mut mpsc::Receiver<StreamFrame>) -> QueryRequestEvent {
    let wait = async {
        while let Some(frame) = rx.recv().await {
            if let StreamFrame::QueryRequest(req) = frame {
                return req;
            }
        }
        panic!("session sink closed before a query-request arrived");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no query-request within 5s")
}
