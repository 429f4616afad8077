use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use querylink_core::error::{BridgeError, Result};
use querylink_core::types::{QueryId, SessionId, TabularResult};

/// Sending half of a caller's pending query.
pub type Completion = oneshot::Sender<Result<TabularResult>>;

/// One outstanding query awaiting its browser callback.
pub struct PendingRecord {
    pub session_id: SessionId,
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub dispatched_at: Instant,
    completion: Completion,
    timeout: Option<AbortHandle>,
}

impl PendingRecord {
    pub fn new(
        session_id: SessionId,
        sql: String,
        params: Vec<serde_json::Value>,
        completion: Completion,
    ) -> Self {
        Self {
            session_id,
            sql,
            params,
            dispatched_at: Instant::now(),
            completion,
            timeout: None,
        }
    }

    fn disarm(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }

    fn complete(mut self, id: &QueryId, outcome: Result<TabularResult>) {
        self.disarm();
        if self.completion.send(outcome).is_err() {
            debug!(query_id = %id, "Caller gone before completion was delivered");
        }
    }
}

/// Diagnostic view of a pending record.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInfo {
    pub query_id: QueryId,
    pub session_id: SessionId,
    pub sql: String,
    pub param_count: usize,
    pub age_ms: u64,
}

/// Shared map of correlation id → pending record.
///
/// Every terminal transition (callback, browser error, timeout, cancel,
/// drain) goes through [`PendingRegistry::take`], so whichever arrives first
/// wins and the rest are no-ops. The lock is held only for map mutation.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    entries: Arc<Mutex<HashMap<QueryId, PendingRecord>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryId, PendingRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, id: &QueryId) -> Option<PendingRecord> {
        self.entries().remove(id)
    }

    /// Insert a record. A duplicate id leaves the existing record alone.
    pub fn register(&self, id: QueryId, record: PendingRecord) -> Result<()> {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            drop(entries);
            warn!(query_id = %id, "Correlation id collision, rejecting new query");
            return Err(BridgeError::RegistryCollision(id.to_string()));
        }
        entries.insert(id, record);
        Ok(())
    }

    /// Spawn the reaper for an already registered `id`. It fails the query
    /// with a timeout once `window` elapses unless the query completes first.
    ///
    /// Returns false if the record was gone by the time the timer could be
    /// attached, in which case the timer is aborted.
    pub fn arm_timeout(&self, id: &QueryId, window: Duration) -> bool {
        let registry = self.clone();
        let reaped = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            registry.expire(&reaped, window);
        })
        .abort_handle();

        match self.entries().get_mut(id) {
            Some(record) => {
                record.timeout = Some(handle);
                true
            }
            None => {
                // Completed (or already expired) before the timer was attached
                handle.abort();
                false
            }
        }
    }

    /// Complete a pending query with its result. Returns false for stale ids.
    pub fn resolve(&self, id: &QueryId, result: TabularResult) -> bool {
        match self.take(id) {
            Some(record) => {
                info!(
                    query_id = %id,
                    session_id = %record.session_id,
                    rows = result.row_count(),
                    elapsed_ms = record.dispatched_at.elapsed().as_millis() as u64,
                    "Query resolved"
                );
                record.complete(id, Ok(result));
                true
            }
            None => {
                warn!(query_id = %id, "Result for stale or unknown correlation id ignored");
                false
            }
        }
    }

    /// Complete a pending query with an error. Returns false for stale ids.
    pub fn fail(&self, id: &QueryId, error: BridgeError) -> bool {
        match self.take(id) {
            Some(record) => {
                warn!(
                    query_id = %id,
                    session_id = %record.session_id,
                    elapsed_ms = record.dispatched_at.elapsed().as_millis() as u64,
                    error = %error,
                    "Query failed"
                );
                record.complete(id, Err(error));
                true
            }
            None => {
                warn!(query_id = %id, error = %error, "Failure for stale or unknown correlation id ignored");
                false
            }
        }
    }

    fn expire(&self, id: &QueryId, window: Duration) {
        match self.take(id) {
            Some(record) => {
                warn!(
                    query_id = %id,
                    session_id = %record.session_id,
                    sql = %record.sql,
                    timeout_secs = window.as_secs(),
                    "Query timed out waiting for browser callback"
                );
                record.complete(
                    id,
                    Err(BridgeError::Timeout {
                        query_id: id.to_string(),
                        timeout_secs: window.as_secs(),
                    }),
                );
            }
            // Callback won the race
            None => debug!(query_id = %id, "Timeout fired after query completed"),
        }
    }

    /// Fail a query its caller no longer waits for.
    pub fn cancel(&self, id: &QueryId, reason: &str) -> bool {
        match self.take(id) {
            Some(record) => {
                debug!(query_id = %id, reason, "Query cancelled");
                record.complete(id, Err(BridgeError::Cancelled(reason.to_string())));
                true
            }
            None => {
                debug!(query_id = %id, reason, "Cancel for query that already completed");
                false
            }
        }
    }

    /// Fail every query that belongs to `session_id`.
    pub fn fail_session(&self, session_id: &SessionId) -> usize {
        let taken: Vec<(QueryId, PendingRecord)> = {
            let mut entries = self.entries();
            let ids: Vec<QueryId> = entries
                .iter()
                .filter(|(_, record)| &record.session_id == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|record| (id, record)))
                .collect()
        };

        let count = taken.len();
        for (id, record) in taken {
            record.complete(
                &id,
                Err(BridgeError::SessionEnded {
                    session_id: session_id.to_string(),
                }),
            );
        }
        if count > 0 {
            info!(session_id = %session_id, count, "Failed residual queries for ended session");
        }
        count
    }

    /// Fail every pending query and leave the registry empty.
    pub fn drain_all(&self, reason: &str) -> usize {
        let taken: Vec<(QueryId, PendingRecord)> = self.entries().drain().collect();
        let count = taken.len();
        for (id, record) in taken {
            record.complete(&id, Err(BridgeError::Shutdown(reason.to_string())));
        }
        info!(count, reason, "Drained pending queries");
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, id: &QueryId) -> bool {
        self.entries().contains_key(id)
    }

    pub fn snapshot(&self) -> Vec<PendingInfo> {
        self.entries()
            .iter()
            .map(|(id, record)| PendingInfo {
                query_id: id.clone(),
                session_id: record.session_id.clone(),
                sql: record.sql.clone(),
                param_count: record.params.len(),
                age_ms: record.dispatched_at.elapsed().as_millis() as u64,
            })
            .collect()
    }
}
