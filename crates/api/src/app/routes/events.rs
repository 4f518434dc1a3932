//! Live change notices over Server-Sent Events.
//!
//! Each SSE event is named after its topic (`order:created`,
//! `order:statusChanged`, `delivery:updated`) and carries the notice payload.
//! Observers re-fetch state on receipt; a dropped connection just misses
//! notices.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
};
use serde::Deserialize;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use fulfillment_events::Topic;
use fulfillment_infra::NoticeBus;

use crate::app::errors;

const POLL_INTERVAL: Duration = Duration::from_millis(1000);
const HEARTBEAT_EVERY: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated topic names; all topics when absent.
    pub topics: Option<String>,
}

impl StreamQuery {
    fn topics(&self) -> Result<Vec<Topic>, String> {
        let Some(raw) = self.topics.as_deref() else {
            return Ok(Topic::ALL.to_vec());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|name| Topic::parse(name).ok_or_else(|| format!("unknown topic: {name}")))
            .collect()
    }
}

/// GET /events?topics=order:created,delivery:updated
pub async fn stream(
    Extension(bus): Extension<Arc<dyn NoticeBus>>,
    Query(query): Query<StreamQuery>,
) -> axum::response::Response {
    let topics = match query.topics() {
        Ok(t) => t,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
    };

    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    let subscription = bus.subscribe_notices();

    // The bus hands out blocking receivers, so the bridge lives on the
    // blocking pool and ends when the client goes away.
    tokio::task::spawn_blocking(move || {
        let mut last_sent = Instant::now();
        loop {
            match subscription.recv_timeout(POLL_INTERVAL) {
                Ok(notice) => {
                    if !topics.contains(&notice.topic()) {
                        continue;
                    }
                    let event = SseEvent::default()
                        .event(notice.topic().as_str())
                        .id(notice.notice_id().to_string())
                        .data(notice.payload().to_string());
                    if tx.send(Ok(event)).is_err() {
                        break;
                    }
                    last_sent = Instant::now();
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        break;
                    }
                    if last_sent.elapsed() > HEARTBEAT_EVERY {
                        let heartbeat = SseEvent::default().event("heartbeat").data("{}");
                        if tx.send(Ok(heartbeat)).is_err() {
                            break;
                        }
                        last_sent = Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("event stream closed");
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT_EVERY))
        .into_response()
}
