use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{info, warn};

use querylink_core::config::BridgeConfig;
use querylink_core::error::{BridgeError, Result};
use querylink_core::protocol::{CallbackOutcome, QueryCallback, StreamFrame};
use querylink_core::types::{QueryId, TabularResult};

use crate::registry::{PendingRecord, PendingRegistry};
use crate::session::SessionContext;

/// Ships queries to the browser and routes callbacks back to their callers.
pub struct QueryBridge {
    registry: PendingRegistry,
    config: BridgeConfig,
}

impl QueryBridge {
    /// Build a bridge. Rejects a zero timeout window and a zero sink buffer.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: PendingRegistry::new(),
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// Number of queries currently awaiting a callback.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Register a query and push its request to the session's browser.
    /// The returned future completes exactly once: result, error, or timeout.
    pub async fn dispatch(
        &self,
        session: &SessionContext,
        sql: impl Into<String>,
        params: Vec<serde_json::Value>,
    ) -> Result<PendingQuery> {
        if !session.is_active() {
            return Err(BridgeError::SessionNotActive);
        }
        if params.len() > self.config.max_params {
            return Err(BridgeError::TooManyParams {
                count: params.len(),
                limit: self.config.max_params,
            });
        }

        let sql = sql.into();
        let id = QueryId::mint();
        let window = self.config.query_timeout();

        let (tx, rx) = oneshot::channel();
        let record = PendingRecord::new(
            session.session_id().clone(),
            sql.clone(),
            params.clone(),
            tx,
        );
        // The record must be in the map before its timer can fire
        self.registry.register(id.clone(), record)?;
        self.registry.arm_timeout(&id, window);

        let mut pending = PendingQuery {
            id: id.clone(),
            rx,
            registry: self.registry.clone(),
            done: false,
        };

        // SessionManager::end may have swept the registry between the
        // liveness check above and the insert
        if !session.is_active() {
            pending.done = true;
            let ended = || BridgeError::SessionEnded {
                session_id: session.session_id().to_string(),
            };
            self.registry.fail(&id, ended());
            return Err(ended());
        }

        info!(
            query_id = %id,
            session_id = %session.session_id(),
            params = params.len(),
            timeout_secs = window.as_secs(),
            "Query dispatched"
        );

        if let Err(e) = session
            .send(StreamFrame::query_request(id.clone(), sql, params))
            .await
        {
            pending.done = true;
            self.registry.fail(
                &id,
                BridgeError::SinkClosed {
                    session_id: session.session_id().to_string(),
                },
            );
            return Err(e);
        }

        Ok(pending)
    }

    /// Dispatch and wait for the outcome.
    pub async fn execute_query(
        &self,
        session: &SessionContext,
        sql: impl Into<String>,
        params: Vec<serde_json::Value>,
    ) -> Result<TabularResult> {
        self.dispatch(session, sql, params).await?.await
    }

    /// Browser posted rows for `id`. Returns false if nobody was waiting.
    pub fn handle_query_result(&self, id: &QueryId, result: TabularResult) -> bool {
        if let Err(e) = result.validate() {
            warn!(query_id = %id, error = %e, "Rejecting malformed result");
            return self.registry.fail(id, e);
        }
        self.registry.resolve(id, result)
    }

    /// Browser reported that executing `id` failed.
    pub fn handle_query_error(&self, id: &QueryId, message: impl Into<String>) -> bool {
        self.registry
            .fail(id, BridgeError::BrowserReported(message.into()))
    }

    /// Route a parsed callback body.
    pub fn handle_callback(&self, callback: QueryCallback) -> bool {
        let (id, outcome) = callback.into_outcome();
        match outcome {
            CallbackOutcome::Result(result) => self.handle_query_result(&id, result),
            CallbackOutcome::Error(message) => self.handle_query_error(&id, message),
            CallbackOutcome::Empty => self.registry.fail(
                &id,
                BridgeError::MalformedResult("callback carried neither result nor error".into()),
            ),
        }
    }

    /// Fail every outstanding query. Called at process shutdown.
    pub fn drain_all(&self, reason: &str) -> usize {
        self.registry.drain_all(reason)
    }
}

/// A dispatched query. Await it for the outcome; dropping it early
/// cancels the query.
pub struct PendingQuery {
    id: QueryId,
    rx: oneshot::Receiver<Result<TabularResult>>,
    registry: PendingRegistry,
    done: bool,
}

impl PendingQuery {
    pub fn id(&self) -> &QueryId {
        &self.id
    }
}

impl Future for PendingQuery {
    type Output = Result<TabularResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(outcome) => {
                this.done = true;
                Poll::Ready(outcome.unwrap_or_else(|_| {
                    Err(BridgeError::Cancelled("completion handle dropped".into()))
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        if !self.done {
            self.registry.cancel(&self.id, "caller stopped waiting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use querylink_core::protocol::QueryRequestEvent;
    use querylink_core::types::SessionId;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn bridge(timeout_secs: u64) -> Arc<QueryBridge> {
        Arc::new(
            QueryBridge::new(BridgeConfig {
                query_timeout_secs: timeout_secs,
                ..BridgeConfig::default()
            })
            .unwrap(),
        )
    }

    fn session() -> (SessionContext, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(16);
        let ctx = SessionContext::new(SessionId::new(), None, tx, CancellationToken::new());
        (ctx, rx)
    }

    async fn next_request(rx: &mut mpsc::Receiver<StreamFrame>) -> QueryRequestEvent {
        match rx.recv().await {
            Some(StreamFrame::QueryRequest(req)) => req,
            other => panic!("expected query-request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn result_round_trip() {
        let bridge = bridge(30);
        let (ctx, mut rx) = session();

        let pending = bridge
            .dispatch(&ctx, "SELECT a FROM t", vec![json!(1)])
            .await
            .unwrap();
        let req = next_request(&mut rx).await;
        assert_eq!(&req.query_id, pending.id());
        assert_eq!(req.sql, "SELECT a FROM t");
        assert_eq!(req.params, vec![json!(1)]);
        assert_eq!(bridge.pending_count(), 1);

        let callback: QueryCallback = serde_json::from_value(json!({
            "queryId": req.query_id,
            "result": {"columns": ["a"], "values": [[1], [2]]}
        }))
        .unwrap();
        assert!(bridge.handle_callback(callback));

        let result = pending.await.unwrap();
        assert_eq!(result.columns, vec!["a"]);
        assert_eq!(result.values, vec![vec![json!(1)], vec![json!(2)]]);
        assert!(!bridge.registry().contains(&req.query_id));
    }

    #[tokio::test]
    async fn browser_error_propagates_message() {
        let bridge = bridge(30);
        let (ctx, mut rx) = session();

        let pending = bridge.dispatch(&ctx, "SELEC 1", vec![]).await.unwrap();
        let req = next_request(&mut rx).await;
        assert!(bridge.handle_query_error(&req.query_id, "near \"SELEC\": syntax error"));

        match pending.await {
            Err(BridgeError::BrowserReported(msg)) => {
                assert_eq!(msg, "near \"SELEC\": syntax error")
            }
            other => panic!("expected BrowserReported, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn select_one_times_out_after_window_not_before() {
        let bridge = bridge(30);
        let (ctx, _rx) = session();
        let started = tokio::time::Instant::now();

        let err = bridge.execute_query(&ctx, "SELECT 1", vec![]).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn inactive_session_fails_fast() {
        let bridge = bridge(30);
        let (ctx, _rx) = session();
        ctx.close();

        assert!(matches!(
            bridge.dispatch(&ctx, "SELECT 1", vec![]).await,
            Err(BridgeError::SessionNotActive)
        ));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn closed_sink_fails_and_unregisters() {
        let bridge = bridge(30);
        let (tx, rx) = mpsc::channel(1);
        let ctx = SessionContext::new(SessionId::new(), None, tx, CancellationToken::new());
        // Active token, but the stream body has already been dropped
        drop(rx);

        let err = bridge.dispatch(&ctx, "SELECT 1", vec![]).await.err();
        assert!(matches!(
            err,
            Some(BridgeError::SessionNotActive) | Some(BridgeError::SinkClosed { .. })
        ));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_dispatches_resolve_out_of_order() {
        let bridge = bridge(30);
        let (ctx, mut rx) = session();

        let first = bridge.dispatch(&ctx, "SELECT 1", vec![]).await.unwrap();
        let second = bridge.dispatch(&ctx, "SELECT 2", vec![]).await.unwrap();
        assert_ne!(first.id(), second.id());
        let req1 = next_request(&mut rx).await;
        let req2 = next_request(&mut rx).await;

        let two = TabularResult::new(vec!["n".into()], vec![vec![json!(2)]]);
        let one = TabularResult::new(vec!["n".into()], vec![vec![json!(1)]]);
        assert!(bridge.handle_query_result(&req2.query_id, two.clone()));
        assert_eq!(second.await.unwrap(), two);
        assert_eq!(bridge.pending_count(), 1);

        assert!(bridge.handle_query_result(&req1.query_id, one.clone()));
        assert_eq!(first.await.unwrap(), one);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_count_tracks_n_dispatches() {
        let bridge = bridge(5);
        let (ctx, _rx) = session();

        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(
                bridge
                    .dispatch(&ctx, format!("SELECT {}", i), vec![])
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(bridge.pending_count(), 8);

        // Resolve half, let the rest time out
        let ids: Vec<QueryId> = handles.iter().map(|p| p.id().clone()).collect();
        for id in &ids[..4] {
            assert!(bridge.handle_query_result(id, TabularResult::default()));
        }
        assert_eq!(bridge.pending_count(), 4);

        let outcomes = await_all(handles).await;
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 4);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(e) if e.is_timeout()))
                .count(),
            4
        );
        assert_eq!(bridge.pending_count(), 0);
    }

    async fn await_all(handles: Vec<PendingQuery>) -> Vec<Result<TabularResult>> {
        let mut out = Vec::new();
        for h in handles {
            out.push(h.await);
        }
        out
    }

    #[tokio::test]
    async fn drain_all_fails_every_waiter() {
        let bridge = bridge(30);
        let (ctx, _rx) = session();

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let pending = bridge.dispatch(&ctx, "SELECT 1", vec![]).await.unwrap();
            waiters.push(tokio::spawn(pending));
        }
        assert_eq!(bridge.drain_all("shutting down"), 3);
        assert_eq!(bridge.pending_count(), 0);

        for w in waiters {
            assert!(matches!(w.await.unwrap(), Err(BridgeError::Shutdown(_))));
        }
    }

    #[tokio::test]
    async fn malformed_result_fails_query() {
        let bridge = bridge(30);
        let (ctx, mut rx) = session();

        let pending = bridge.dispatch(&ctx, "SELECT a, b", vec![]).await.unwrap();
        let req = next_request(&mut rx).await;
        let bad = TabularResult::new(vec!["a".into(), "b".into()], vec![vec![json!(1)]]);
        assert!(bridge.handle_query_result(&req.query_id, bad));
        assert!(matches!(pending.await, Err(BridgeError::MalformedResult(_))));
    }

    #[tokio::test]
    async fn dropping_pending_query_cancels_it() {
        let bridge = bridge(30);
        let (ctx, mut rx) = session();

        let pending = bridge.dispatch(&ctx, "SELECT 1", vec![]).await.unwrap();
        let req = next_request(&mut rx).await;
        drop(pending);

        assert_eq!(bridge.pending_count(), 0);
        assert!(!bridge.handle_query_result(&req.query_id, TabularResult::default()));
    }

    #[tokio::test]
    async fn too_many_params_rejected() {
        let bridge = Arc::new(
            QueryBridge::new(BridgeConfig {
                max_params: 2,
                ..BridgeConfig::default()
            })
            .unwrap(),
        );
        let (ctx, _rx) = session();
        let params = vec![json!(1), json!(2), json!(3)];
        assert!(matches!(
            bridge.dispatch(&ctx, "SELECT ?, ?, ?", params).await,
            Err(BridgeError::TooManyParams { count: 3, limit: 2 })
        ));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn zero_timeout_window_rejected() {
        let config = BridgeConfig {
            query_timeout_secs: 0,
            ..BridgeConfig::default()
        };
        assert!(matches!(QueryBridge::new(config), Err(BridgeError::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_dispatch_reaches_a_terminal_outcome() {
        let bridge = bridge(1);
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = SessionContext::new(SessionId::new(), None, tx, CancellationToken::new());
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let mut waiters = Vec::new();
        for i in 0..500 {
            let pending = bridge.dispatch(&ctx, format!("SELECT {}", i), vec![]).await.unwrap();
            waiters.push(tokio::spawn(pending));
        }
        for w in waiters {
            let outcome = tokio::time::timeout(Duration::from_secs(5), w)
                .await
                .expect("dispatched query never completed")
                .unwrap();
            assert!(outcome.unwrap_err().is_timeout());
        }
        assert_eq!(bridge.pending_count(), 0);
    }
}
