use futures::future::BoxFuture;
use tracing::debug;

use querylink_bridge::AnalysisContext;
use querylink_core::error::Result;
use querylink_core::protocol::StreamFrame;

/// Produces the body of one chat response. This is where an LLM agent
/// plugs in; anything it runs can reach the browser database through
/// the `AnalysisContext` it is handed.
pub trait ChatResponder: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Answer `message`, pushing frames through `ctx`. An `Err` is reported
    /// to the browser as an error frame.
    fn respond(&self, ctx: AnalysisContext, message: String) -> BoxFuture<'_, Result<()>>;
}

/// Runs the chat message itself as SQL and streams back the table.
pub struct DirectQueryResponder;

impl ChatResponder for DirectQueryResponder {
    fn name(&self) -> &str {
        "direct_query"
    }

    fn respond(&self, ctx: AnalysisContext, message: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let sql = message.trim().to_string();
            debug!(sql = %sql, "Running chat message as SQL");

            match ctx.execute_query(sql, vec![]).await {
                Ok(result) => {
                    let summary = match result.row_count() {
                        1 => "1 row".to_string(),
                        n => format!("{} rows", n),
                    };
                    ctx.emit(StreamFrame::Text { content: summary }).await?;
                    ctx.emit(StreamFrame::Table { result }).await
                }
                Err(e) => {
                    ctx.emit(StreamFrame::Error {
                        message: e.user_message(),
                    })
                    .await
                }
            }
        })
    }
}
