use serde::{Deserialize, Serialize};

use crate::types::{QueryId, SessionId, TabularResult};

/// Server → browser: run this SQL and post the outcome back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequestEvent {
    #[serde(rename = "queryId")]
    pub query_id: QueryId,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

/// Browser → server: body of the query callback POST.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryCallback {
    #[serde(rename = "queryId")]
    pub query_id: QueryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TabularResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a callback carries once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Result(TabularResult),
    Error(String),
    Empty,
}

impl QueryCallback {
    pub fn success(query_id: QueryId, result: TabularResult) -> Self {
        Self {
            query_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(query_id: QueryId, error: impl Into<String>) -> Self {
        Self {
            query_id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Split into id and outcome. An error wins if both are present.
    pub fn into_outcome(self) -> (QueryId, CallbackOutcome) {
        let outcome = match (self.error, self.result) {
            (Some(err), _) => CallbackOutcome::Error(err),
            (None, Some(result)) => CallbackOutcome::Result(result),
            (None, None) => CallbackOutcome::Empty,
        };
        (self.query_id, outcome)
    }
}

/// A frame pushed on a session's SSE stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamFrame {
    Session {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "threadId", default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
    QueryRequest(QueryRequestEvent),
    Text {
        content: String,
    },
    Table {
        #[serde(flatten)]
        result: TabularResult,
    },
    Error {
        message: String,
    },
    Done,
}

impl StreamFrame {
    pub fn query_request(query_id: QueryId, sql: String, params: Vec<serde_json::Value>) -> Self {
        StreamFrame::QueryRequest(QueryRequestEvent {
            query_id,
            sql,
            params,
        })
    }

    /// SSE `event:` name; matches the `type` tag in the payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Session { .. } => "session",
            StreamFrame::QueryRequest(_) => "query-request",
            StreamFrame::Text { .. } => "text",
            StreamFrame::Table { .. } => "table",
            StreamFrame::Error { .. } => "error",
            StreamFrame::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_request_wire_format() {
        let frame = StreamFrame::query_request(
            QueryId::from_string("q-1"),
            "SELECT ? AS a".into(),
            vec![json!(7)],
        );
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "query-request",
                "queryId": "q-1",
                "sql": "SELECT ? AS a",
                "params": [7],
            })
        );
        assert_eq!(frame.event_name(), "query-request");
    }

    #[test]
    fn callback_success_parses() {
        let cb: QueryCallback = serde_json::from_value(json!({
            "queryId": "q-9",
            "result": {"columns": ["a"], "values": [[1], [2]]}
        }))
        .unwrap();
        let (id, outcome) = cb.into_outcome();
        assert_eq!(id.as_str(), "q-9");
        match outcome {
            CallbackOutcome::Result(r) => {
                assert_eq!(r.columns, vec!["a"]);
                assert_eq!(r.values, vec![vec![json!(1)], vec![json!(2)]]);
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn callback_error_wins_over_result() {
        let cb: QueryCallback = serde_json::from_value(json!({
            "queryId": "q-9",
            "result": {"columns": [], "values": []},
            "error": "boom"
        }))
        .unwrap();
        assert_eq!(cb.into_outcome().1, CallbackOutcome::Error("boom".into()));
    }

    #[test]
    fn callback_without_payload_is_empty() {
        let cb: QueryCallback = serde_json::from_value(json!({"queryId": "q-9"})).unwrap();
        assert_eq!(cb.into_outcome().1, CallbackOutcome::Empty);
    }

    #[test]
    fn table_and_done_frames() {
        let frame = StreamFrame::Table {
            result: TabularResult::new(vec!["n".into()], vec![vec![json!(3)]]),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "table", "columns": ["n"], "values": [[3]]})
        );
        assert_eq!(
            serde_json::to_value(StreamFrame::Done).unwrap(),
            json!({"type": "done"})
        );
    }
}
