use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use super::EventSink;
use crate::model::{Envelope, EventKind};

/// Topic routing for the broker sink. Highlights are produced by the agent
/// onto its own topic, so they have no mapping here and are dropped.
pub(crate) fn topic_for(kind: EventKind) -> Option<&'static str> {
    match kind {
        EventKind::ScheduleUpsert => Some("esports.lol.schedule.upsert"),
        EventKind::MatchStatus => Some("esports.lol.match.status"),
        EventKind::ResultUpsert => Some("esports.lol.result.upsert"),
        EventKind::LiveWindow => Some("esports.lol.live.window"),
        EventKind::LiveDetails => Some("esports.lol.live.details"),
        EventKind::Highlight => None,
    }
}

/// Stable partitioning key: the entity id from the payload when present,
/// the envelope key otherwise. Same entity → same partition → emission
/// order preserved downstream.
pub(crate) fn key_for(event: &Envelope) -> String {
    match event.payload.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => event.key.clone(),
    }
}

/// Broker sink: one shared idempotent producer, created lazily on first
/// write and guarded by a mutex.
pub struct KafkaSink {
    bootstrap: String,
    producer: Mutex<Option<FutureProducer>>,
}

impl KafkaSink {
    pub fn new(bootstrap: &str) -> Self {
        KafkaSink {
            bootstrap: bootstrap.to_string(),
            producer: Mutex::new(None),
        }
    }

    async fn producer(&self) -> Result<FutureProducer> {
        let mut guard = self.producer.lock().await;
        if let Some(p) = guard.as_ref() {
            return Ok(p.clone());
        }
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "lz4")
            .set("linger.ms", "20")
            .set("request.timeout.ms", "15000")
            .create()
            .context("Failed to create Kafka producer")?;
        info!("Kafka sink connected to {}", self.bootstrap);
        *guard = Some(producer.clone());
        Ok(producer)
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn write_event(&self, event: &Envelope) -> Result<()> {
        let Some(topic) = topic_for(event.kind) else {
            return Ok(());
        };
        let producer = self.producer().await?;
        let key = key_for(event);
        // the whole envelope goes on the wire so consumers can evolve
        let value = serde_json::to_vec(event).context("Failed to serialize envelope")?;
        producer
            .send(
                FutureRecord::to(topic).key(&key).payload(&value),
                Timeout::After(Duration::from_secs(15)),
            )
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Kafka send to {} failed: {}", topic, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{normalize_match, Envelope};
    use serde_json::json;

    #[test]
    fn test_topic_map() {
        assert_eq!(
            topic_for(EventKind::ScheduleUpsert),
            Some("esports.lol.schedule.upsert")
        );
        assert_eq!(
            topic_for(EventKind::ResultUpsert),
            Some("esports.lol.result.upsert")
        );
        assert_eq!(
            topic_for(EventKind::LiveWindow),
            Some("esports.lol.live.window")
        );
        assert_eq!(
            topic_for(EventKind::LiveDetails),
            Some("esports.lol.live.details")
        );
        assert_eq!(topic_for(EventKind::Highlight), None);
    }

    #[test]
    fn test_key_prefers_payload_id() {
        let norm = normalize_match(&json!({"id": 42, "status": "running"})).unwrap();
        let ev = Envelope::for_match(EventKind::ScheduleUpsert, &norm);
        assert_eq!(key_for(&ev), "42");
    }

    #[test]
    fn test_key_falls_back_to_envelope_key() {
        let ev = Envelope::for_live(
            EventKind::LiveWindow,
            "110303",
            json!({"esportsGameId": "110303", "frames": []}),
        );
        assert_eq!(key_for(&ev), "lolesports:game:110303");
    }
}
