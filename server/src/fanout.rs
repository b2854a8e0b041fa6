//! Event broadcaster: publishes real-time envelopes for the socket gateway to deliver.

use grandaviator_types::EventMessage;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Fire-and-forget publication. Failures are logged by the implementation and never reach the
/// caller.
pub trait Broadcaster: Clone + Send + Sync + 'static {
    fn publish(&self, event: EventMessage) -> impl Future<Output = ()> + Send;
}

/// Publishes JSON envelopes on a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisFanout {
    channel: String,
    client: redis::Client,
    publisher: Arc<Mutex<Option<redis::aio::ConnectionManager>>>,
}

impl RedisFanout {
    pub fn new(url: &str, channel: String) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            channel,
            client,
            publisher: Arc::new(Mutex::new(None)),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn ensure_publisher(
        &self,
    ) -> Result<
        tokio::sync::MutexGuard<'_, Option<redis::aio::ConnectionManager>>,
        redis::RedisError,
    > {
        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        Ok(guard)
    }
}

impl Broadcaster for RedisFanout {
    async fn publish(&self, event: EventMessage) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(event = %event.event, "Event encode failed: {err}");
                return;
            }
        };
        if payload.len() > MAX_EVENT_BYTES {
            tracing::warn!(
                len = payload.len(),
                event = %event.event,
                "Skipping event publish: payload exceeds max size"
            );
            return;
        }
        let mut guard = match self.ensure_publisher().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!("Event publisher connection failed: {err}");
                return;
            }
        };
        let Some(conn) = guard.as_mut() else {
            return;
        };
        let result: redis::RedisResult<()> = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(conn)
            .await;
        if let Err(err) = result {
            tracing::warn!(org_id = %event.org_id, "Event publish failed: {err}");
            *guard = None;
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
pub use recorder::Recorder;

#[cfg(any(test, feature = "mocks"))]
mod recorder {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Keeps every published event in order.
    #[derive(Clone, Default)]
    pub struct Recorder {
        events: Arc<StdMutex<Vec<EventMessage>>>,
    }

    impl Recorder {
        pub fn events(&self) -> Vec<EventMessage> {
            match self.events.lock() {
                Ok(events) => events.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        pub fn named(&self, event: &str) -> Vec<EventMessage> {
            self.events()
                .into_iter()
                .filter(|message| message.event == event)
                .collect()
        }
    }

    impl Broadcaster for Recorder {
        async fn publish(&self, event: EventMessage) {
            match self.events.lock() {
                Ok(mut events) => events.push(event),
                Err(poisoned) => poisoned.into_inner().push(event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grandaviator_types::{Flight, EVENT_FLIGHT_STATE, EVENT_LICENSE_UPDATE};

    #[tokio::test]
    async fn test_recorder_filters_by_event() {
        let recorder = Recorder::default();
        recorder
            .publish(EventMessage::flight_state(&Flight::new("f1", "org", 0)))
            .await;
        recorder.publish(EventMessage::license_expired("org")).await;
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.named(EVENT_FLIGHT_STATE).len(), 1);
        assert_eq!(recorder.named(EVENT_LICENSE_UPDATE)[0].room, "admin");
    }

    #[test]
    fn test_redis_fanout_keeps_channel() {
        let fanout = RedisFanout::new("redis://127.0.0.1:6379", "events".into()).unwrap();
        assert_eq!(fanout.channel(), "events");
    }
}
