//! Change-notice fan-out.
//!
//! Services publish through [`NoticeBus`] and never look at the outcome
//! beyond a log line. The in-process bus from `fulfillment-events` backs the
//! SSE endpoints; with the `redis` feature the same notices are bridged over
//! Redis pub/sub so observers attached to another process see them too.

use tracing::{debug, warn};

use fulfillment_events::{ChangeNotice, EventBus, Subscription};

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubEventBus};

/// Object-safe face of an `EventBus<ChangeNotice>`.
pub trait NoticeBus: Send + Sync {
    /// Best-effort broadcast. Failures are logged and dropped.
    fn publish_notice(&self, notice: ChangeNotice);

    fn subscribe_notices(&self) -> Subscription<ChangeNotice>;
}

impl<B> NoticeBus for B
where
    B: EventBus<ChangeNotice>,
{
    fn publish_notice(&self, notice: ChangeNotice) {
        let topic = notice.topic();
        let id = notice.id();
        match self.publish(notice) {
            Ok(()) => debug!(%topic, id, "notice published"),
            Err(e) => warn!(%topic, id, error = ?e, "notice publish failed"),
        }
    }

    fn subscribe_notices(&self) -> Subscription<ChangeNotice> {
        self.subscribe()
    }
}
