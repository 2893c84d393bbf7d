use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use service_core::error::AppError;
use std::convert::Infallible;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::models::Principal;
use crate::startup::AppState;

/// Server-sent stream of realtime events addressed to the caller.
pub async fn stream_events(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let receiver = state
        .realtime
        .subscribe()
        .ok_or(AppError::ServiceUnavailable)?;

    tracing::debug!(user_id = %principal.user_id, "Realtime subscriber connected");
    let room = principal.user_id;
    let stream = BroadcastStream::new(receiver).filter_map(move |message| match message {
        Ok(event) if event.room == room => Some(Ok(Event::default()
            .event(event.event)
            .data(event.payload.to_string()))),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Realtime subscriber lagged");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
