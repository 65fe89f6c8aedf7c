//! Subscriber-facing event session: greeting, events, heartbeats.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::Stream;
use serde_json::json;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::hub::{ProgressEvent, Subscription};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// One frame to deliver to a client: an event name and a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl From<ProgressEvent> for SessionFrame {
    fn from(event: ProgressEvent) -> Self {
        Self {
            event: event.kind.as_str().to_owned(),
            data: event.payload,
        }
    }
}

/// Wraps a [`Subscription`] into the frame sequence streamed to a client.
///
/// Yields `connected` first, then published events interleaved with `ping`
/// heartbeats. Ends when the subscription closes or `shutdown` fires. Dropping
/// the session drops the subscription and unregisters it from the hub.
pub struct EventSession {
    subscription: Subscription,
    heartbeat: Interval,
    shutdown: CancellationToken,
    greeted: bool,
}

impl EventSession {
    #[must_use]
    pub fn new(
        subscription: Subscription,
        heartbeat: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let period = heartbeat.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            subscription,
            heartbeat,
            shutdown,
            greeted: false,
        }
    }

    pub async fn next_frame(&mut self) -> Option<SessionFrame> {
        if !self.greeted {
            self.greeted = true;
            return Some(SessionFrame {
                event: "connected".into(),
                data: json!({
                    "message": "connected to project event stream",
                    "project_id": self.subscription.topic(),
                }),
            });
        }

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => None,
            event = self.subscription.recv() => event.map(SessionFrame::from),
            _ = self.heartbeat.tick() => Some(SessionFrame {
                event: "ping".into(),
                data: json!({ "timestamp": unix_now() }),
            }),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = SessionFrame> + Send {
        futures::stream::unfold(self, |mut session| async move {
            session.next_frame().await.map(|frame| (frame, session))
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
