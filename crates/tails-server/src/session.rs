//! Subscriber sessions: one SSE connection bridged to the broker.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tails_core::Subscription;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::routes::AppState;

/// SSE framing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Interval between keep-alive comments (`None` disables them).
    pub keep_alive: Option<Duration>,
    /// Emit an `event: message` field before each `data:` line.
    pub event_name: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keep_alive: Some(Duration::from_secs(15)),
            event_name: true,
        }
    }
}

/// `GET /sse`: stream every line published after the join settles.
pub async fn stream(State(state): State<AppState>) -> Response {
    let subscription = match state.broker.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Refusing stream");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Streaming unavailable: {e}"),
            )
                .into_response();
        }
    };
    info!(subscriber = %subscription.id(), "Stream opened");

    let events = event_stream(subscription, state.stream.event_name, state.shutdown.clone());
    let mut response = match state.stream.keep_alive {
        Some(interval) => Sse::new(events)
            .keep_alive(KeepAlive::new().interval(interval))
            .into_response(),
        None => Sse::new(events).into_response(),
    };
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Body stream for one subscriber.
///
/// Ends when the broker closes the conduit or `shutdown` fires. Dropping the
/// stream (client gone) drops the subscription, which leaves the broker.
fn event_stream(
    mut subscription: Subscription,
    event_name: bool,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream! {
        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => None,
                event = subscription.recv() => event,
            };
            let Some(event) = next else {
                break;
            };
            yield Ok(frame(event.as_str(), event_name));
        }
        debug!(subscriber = %subscription.id(), "Stream ended");
    }
}

/// Build one SSE frame. Fields are written in call order, so the event name
/// goes first. Carriage returns cannot be carried in a `data:` field.
fn frame(line: &str, event_name: bool) -> Event {
    let event = if event_name {
        Event::default().event("message")
    } else {
        Event::default()
    };
    if line.contains('\r') {
        event.data(line.replace('\r', ""))
    } else {
        event.data(line)
    }
}
