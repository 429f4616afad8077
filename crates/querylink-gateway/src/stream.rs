use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use querylink_bridge::{AnalysisContext, SessionContext};
use querylink_core::protocol::StreamFrame;

use crate::state::AppState;

/// Open a session for one chat message and stream its frames as SSE.
///
/// The session lives until the responder finishes or the client goes away,
/// whichever happens first. Dropping the stream cancels the session.
pub fn open(
    state: Arc<AppState>,
    message: String,
    thread_id: Option<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (ctx, rx) = state.sessions.begin(thread_id);
    let hangup = ctx.cancel_token().drop_guard();
    let keep_alive = state.bridge.config().keep_alive();

    tokio::spawn(run_session(state, ctx, message));

    let events = ReceiverStream::new(rx).map(move |frame| {
        let _session_alive = &hangup;
        Ok::<_, Infallible>(to_event(&frame))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(keep_alive))
}

async fn run_session(state: Arc<AppState>, ctx: SessionContext, message: String) {
    let announce = StreamFrame::Session {
        session_id: ctx.session_id().clone(),
        thread_id: ctx.thread_id().map(str::to_string),
    };
    if ctx.send(announce).await.is_err() {
        state.sessions.end(&ctx);
        return;
    }

    let analysis = AnalysisContext::new(state.bridge.clone(), ctx.clone());
    tokio::select! {
        outcome = state.responder.respond(analysis, message) => {
            if let Err(e) = outcome {
                warn!(
                    session_id = %ctx.session_id(),
                    responder = state.responder.name(),
                    error = %e,
                    "Responder failed"
                );
                let _ = ctx.send(StreamFrame::Error { message: e.user_message() }).await;
            }
        }
        _ = ctx.cancelled() => {
            info!(session_id = %ctx.session_id(), "Client disconnected mid-response");
        }
    }

    state.sessions.end(&ctx);
    let _ = ctx.send(StreamFrame::Done).await;
}

fn to_event(frame: &StreamFrame) -> Event {
    let event = Event::default().event(frame.event_name());
    match event.json_data(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Failed to serialize stream frame");
            Event::default()
                .event("error")
                .data(r#"{"type":"error","message":"internal serialization error"}"#)
        }
    }
}
