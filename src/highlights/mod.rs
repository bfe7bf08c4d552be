pub mod detect;
pub mod state;

pub use detect::{Cooldowns, DetectorConfig, Highlight};

use anyhow::{Context, Result};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::model::Envelope;
use crate::sink::PgSink;
use detect::detect;
use state::GameState;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub bootstrap: String,
    pub group_id: String,
    pub live_topic: String,
    pub highlights_topic: String,
    pub detector: DetectorConfig,
}

/// Stateful consumer of live-window frames: keeps one [`GameState`] per
/// game, runs the detectors on each inbound frame batch, and publishes
/// every highlight to the highlights topic plus the relational raw landing.
pub struct HighlightsAgent {
    settings: AgentSettings,
    consumer: StreamConsumer,
    producer: FutureProducer,
    raw_landing: Option<Arc<PgSink>>,
    games: HashMap<String, GameState>,
}

impl HighlightsAgent {
    pub fn new(settings: AgentSettings, raw_landing: Option<Arc<PgSink>>) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.bootstrap)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .context("Failed to create Kafka consumer")?;
        consumer
            .subscribe(&[settings.live_topic.as_str()])
            .context("Failed to subscribe to live topic")?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.bootstrap)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "lz4")
            .set("linger.ms", "10")
            .create()
            .context("Failed to create Kafka producer")?;

        info!(
            "Highlights agent started; in={} out={}",
            settings.live_topic, settings.highlights_topic
        );
        Ok(HighlightsAgent {
            settings,
            consumer,
            producer,
            raw_landing,
            games: HashMap::new(),
        })
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            // copy the message out so the consumer borrow ends before handling
            let (bytes, key) = match self.consumer.recv().await {
                Ok(msg) => {
                    let Some(payload) = msg.payload() else { continue };
                    let key = msg
                        .key()
                        .map(|k| String::from_utf8_lossy(k).into_owned())
                        .filter(|k| !k.is_empty());
                    (payload.to_vec(), key)
                }
                Err(e) => {
                    warn!("Kafka consume error: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.handle_message(&bytes, key).await {
                warn!("Highlight frame handling failed: {:#}", e);
            }
        }
    }

    async fn handle_message(&mut self, bytes: &[u8], key: Option<String>) -> Result<()> {
        let value: Value = serde_json::from_slice(bytes).context("Invalid JSON on live topic")?;
        // envelope if present, bare frame payload otherwise
        let (payload, envelope_key) = match serde_json::from_value::<Envelope>(value.clone()) {
            Ok(env) => (env.payload, Some(env.key)),
            Err(_) => (value, None),
        };
        let Some(game_id) = key.or_else(|| {
            envelope_key.and_then(|k| k.rsplit(':').next().map(str::to_string))
        }) else {
            return Ok(());
        };

        // only the newest frame matters; older frames in the batch were
        // reflected by earlier emissions
        let Some(frame) = payload
            .get("frames")
            .and_then(Value::as_array)
            .and_then(|frames| frames.last())
            .cloned()
        else {
            return Ok(());
        };

        let state = self.games.entry(game_id.clone()).or_insert_with(GameState::new);
        let highlights = detect(state, &frame, &self.settings.detector, Instant::now());
        if highlights.is_empty() {
            return Ok(());
        }

        let teams = json!({"blue": state.blue_team, "red": state.red_team});
        for highlight in highlights {
            self.emit(&game_id, &teams, highlight).await?;
        }
        Ok(())
    }

    async fn emit(&self, game_id: &str, teams: &Value, highlight: Highlight) -> Result<()> {
        info!("highlight {} for game {}", highlight.kind, game_id);
        let event = Envelope::for_highlight(game_id, &highlight.kind, teams.clone(), highlight.meta);

        let value = serde_json::to_vec(&event).context("Failed to serialize highlight")?;
        self.producer
            .send(
                FutureRecord::to(&self.settings.highlights_topic)
                    .key(game_id)
                    .payload(&value),
                Timeout::After(Duration::from_secs(15)),
            )
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Kafka send failed: {}", e))?;

        if let Some(pg) = &self.raw_landing {
            pg.write_event(&event).await?;
        }
        Ok(())
    }
}
