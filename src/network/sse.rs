//! Server-sent event stream for a live subscription

use std::convert::Infallible;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use hyper::Response;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::model::CapturedRequest;
use crate::subscription::Subscription;
use crate::Result;

use super::http::ResponseBody;

/// First event sent on every stream
pub const CONNECTED_EVENT: &[u8] = b"data: connected\n\n";

/// Comment sent periodically so dead clients are noticed
pub const KEEPALIVE_COMMENT: &[u8] = b": keepalive\n\n";

struct StreamState {
    subscription: Subscription,
    keepalive: Interval,
}

/// Encode one captured request as an SSE `data:` event
///
/// # Errors
///
/// Returns error if the request cannot be serialized
pub fn encode_event(request: &CapturedRequest) -> Result<Bytes> {
    let json = serde_json::to_vec(request)?;

    let mut event = Vec::with_capacity(json.len() + 8);
    event.extend_from_slice(b"data: ");
    event.extend_from_slice(&json);
    event.extend_from_slice(b"\n\n");
    Ok(Bytes::from(event))
}

/// Build a `text/event-stream` response fed by the subscription
///
/// The stream ends when the subscription is closed. Dropping the response
/// body (client gone) drops the subscription, which unregisters it.
#[must_use]
pub fn event_stream(subscription: Subscription, keepalive: Duration) -> Response<ResponseBody> {
    let mut interval = time::interval_at(Instant::now() + keepalive, keepalive);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = StreamState {
        subscription,
        keepalive: interval,
    };

    let events = stream::once(async { Bytes::from_static(CONNECTED_EVENT) })
        .chain(stream::unfold(state, next_event))
        .map(|bytes| Ok::<_, Infallible>(Frame::data(bytes)));

    let mut response = Response::new(StreamBody::new(events).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

async fn next_event(mut state: StreamState) -> Option<(Bytes, StreamState)> {
    loop {
        tokio::select! {
            next = state.subscription.recv() => {
                let Some(request) = next else {
                    debug!("Subscription {} on jar {} closed, ending stream",
                        state.subscription.id(), state.subscription.jar_id());
                    return None;
                };

                match encode_event(&request) {
                    Ok(event) => return Some((event, state)),
                    Err(e) => {
                        error!("Failed to encode request {}: {}", request.id, e);
                    }
                }
            }
            _ = state.keepalive.tick() => {
                return Some((Bytes::from_static(KEEPALIVE_COMMENT), state));
            }
        }
    }
}
