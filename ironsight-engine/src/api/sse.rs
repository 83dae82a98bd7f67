//! Server-Sent Events (SSE) broadcaster
//!
//! Streams engine events to connected clients. A new client first gets a
//! `State` snapshot so it can draw the scorecard before the next shot.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use ironsight_common::events::IronsightEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use super::server::AppContext;

/// GET /events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected");

    // Subscribe before taking the snapshot so nothing falls in between
    let rx = ctx.state.subscribe_events();
    let snapshot = match ctx.handle.snapshot().await {
        Ok(snapshot) => Some(snapshot.into_event()),
        Err(e) => {
            warn!("SSE client gets no initial state: {}", e);
            None
        }
    };

    let live = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => to_sse(&event),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!("SSE client lagged, {} events dropped", missed);
                None
            }
        }
    });

    let stream = async_stream::stream! {
        if let Some(event) = snapshot.as_ref().and_then(to_sse) {
            yield event;
        }
        let mut live = Box::pin(live);
        while let Some(event) = live.next().await {
            yield event;
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_sse(event: &IronsightEvent) -> Option<Result<Event, Infallible>> {
    match serde_json::to_string(event) {
        Ok(json) => {
            debug!("Broadcasting SSE event: {}", event.event_type());
            Some(Ok(Event::default().event(event.event_type()).data(json)))
        }
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}
