//! Redis pub/sub-backed notice bus (optional).
//!
//! One channel per topic, named after the topic itself (`order:created`,
//! `order:statusChanged`, `delivery:updated`). Pub/sub is not durable: a
//! subscriber that is offline misses notices, which is acceptable for
//! cache-invalidation hints.

use std::sync::mpsc;
use std::thread;

use redis::Commands;
use thiserror::Error;
use tracing::warn;

use fulfillment_events::{ChangeNotice, EventBus, Subscription, Topic};

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("serialize error: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone)]
pub struct RedisPubSubEventBus {
    client: redis::Client,
}

impl RedisPubSubEventBus {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self { client })
    }
}

impl EventBus<ChangeNotice> for RedisPubSubEventBus {
    type Error = RedisBusError;

    fn publish(&self, notice: ChangeNotice) -> Result<(), Self::Error> {
        let payload =
            serde_json::to_string(&notice).map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let _: i64 = conn
            .publish(notice.topic().as_str(), payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        Ok(())
    }

    fn subscribe(&self) -> Subscription<ChangeNotice> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();

        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "redis subscriber could not connect");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            for topic in Topic::ALL {
                if let Err(e) = pubsub.subscribe(topic.as_str()) {
                    warn!(%topic, error = %e, "redis subscribe failed");
                    return;
                }
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(_) => return,
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let notice: ChangeNotice = match serde_json::from_str(&payload) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(channel = msg.get_channel_name(), error = %e, "dropping malformed notice");
                        continue;
                    }
                };

                if tx.send(notice).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}
