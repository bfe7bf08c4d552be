pub mod kafka;
pub mod postgres;

pub use kafka::KafkaSink;
pub use postgres::PgSink;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::metrics;
use crate::model::Envelope;

/// A durable destination for bus events.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn write_event(&self, event: &Envelope) -> Result<()>;
}

/// Drain the bus, invoking every sink concurrently per event.
///
/// A failing sink is logged and counted but never aborts the others; the
/// loop itself never retries (durability comes from the raw landing and
/// the overlap-polling streams).
pub async fn consume(mut rx: mpsc::Receiver<Envelope>, sinks: Vec<Arc<dyn EventSink>>) {
    while let Some(event) = rx.recv().await {
        debug!("Consumed event: {}", event.kind);
        let writes = sinks.iter().map(|sink| {
            let event = &event;
            async move { (sink.name(), sink.write_event(event).await) }
        });
        for (name, result) in join_all(writes).await {
            if let Err(e) = result {
                metrics::SINK_ERRORS.with_label_values(&[name]).inc();
                error!("Sink '{}' failed for {}: {:#}", name, event.key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::model::{normalize_match, EventKind};
    use serde_json::json;
    use tokio::sync::Mutex;

    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }
        async fn write_event(&self, event: &Envelope) -> Result<()> {
            self.seen.lock().await.push(event.key.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn write_event(&self, _event: &Envelope) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_starve_the_other() {
        let (bus, rx) = EventBus::new(8);
        for id in [1, 2, 3] {
            let norm = normalize_match(&json!({"id": id, "status": "finished"})).unwrap();
            bus.publish(Envelope::for_match(EventKind::ResultUpsert, &norm));
        }
        drop(bus);

        let recording = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });
        let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(FailingSink), recording.clone()];
        consume(rx, sinks).await;

        let seen = recording.seen.lock().await;
        assert_eq!(*seen, vec!["match:1", "match:2", "match:3"]);
    }
}
