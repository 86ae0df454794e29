//! Dev log panel: recent events and a live server-sent event stream.
use super::AppState;
use crate::event_log::LogRecord;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use log::warn;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub async fn recent_logs(State(state): State<Arc<AppState>>) -> Json<Vec<LogRecord>> {
    Json(state.events.recent())
}

pub async fn clear_logs(State(state): State<Arc<AppState>>) -> StatusCode {
    state.events.clear();
    StatusCode::NO_CONTENT
}

pub async fn stream_logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(record) => {
                    let event = Event::default()
                        .event("log")
                        .json_data(&record)
                        .unwrap_or_else(|_| Event::default().event("log").data(record.message));
                    return Some((Ok::<_, Infallible>(event), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dev log stream lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
