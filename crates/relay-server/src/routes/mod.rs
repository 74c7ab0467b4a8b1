//! API routes

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Router;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use relay_core::upstream::StreamEvent;

use crate::AppState;

mod chat;
mod messages;
mod models;

/// Build the versioned API router
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(chat::router())
        .merge(messages::router())
        .merge(models::router())
}

/// Relay an upstream chunk stream to the caller as SSE.
///
/// Chunks go out verbatim as `data: <payload>` frames in arrival order,
/// terminated by `data: [DONE]`. A mid-stream failure is reported with
/// one final error frame and a close - never a late 500.
pub(crate) fn relay_stream(
    rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(frame_for(event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// One upstream event to one SSE frame.
fn frame_for(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Data(payload) => Event::default().data(payload),
        StreamEvent::Done => Event::default().data("[DONE]"),
        StreamEvent::Error(e) => {
            tracing::error!("Stream relay error: {}", e);
            Event::default().data(r#"{"error":"Stream error"}"#)
        }
    }
}
