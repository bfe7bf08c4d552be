use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod bus;
mod config;
mod highlights;
mod ingestion;
mod metrics;
mod model;
mod sink;

use bus::EventBus;
use config::{Command, Config};
use highlights::{AgentSettings, HighlightsAgent};
use ingestion::{LiveStream, LolEsportsClient, PandaScoreClient, ResultsStream, ScheduleStream};
use sink::{EventSink, KafkaSink, PgSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    match config.command() {
        Command::Ingest => run_ingestion(config).await,
        Command::Highlights => run_highlights(config).await,
    }
}

async fn run_ingestion(config: Config) -> Result<()> {
    let prom_port = config.prom_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(prom_port).await {
            warn!("Metrics server failed: {:#}", e);
        }
    });

    let (bus, rx) = EventBus::new(bus::DEFAULT_CAPACITY);

    // Sinks degrade gracefully: whatever is configured gets the events,
    // and with nothing configured the pipeline only logs.
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    match &config.pg_dsn {
        Some(dsn) => {
            sinks.push(Arc::new(PgSink::connect(dsn).await?));
        }
        None => warn!("PG_DSN not set - relational sink disabled"),
    }
    match &config.kafka_bootstrap {
        Some(bootstrap) => {
            sinks.push(Arc::new(KafkaSink::new(bootstrap)));
            info!("Broker sink enabled ({})", bootstrap);
        }
        None => warn!("KAFKA_BOOTSTRAP not set - broker sink disabled"),
    }
    if sinks.is_empty() {
        warn!("No sinks configured - events will only be logged");
    }

    let token = config
        .pandascore_token
        .as_deref()
        .context("PANDASCORE_TOKEN is required")?;
    let pandascore = Arc::new(PandaScoreClient::new(
        &config.pandascore_base_url,
        token,
        config.requests_per_hour,
        config.http_timeout(),
    )?);
    let lolesports = Arc::new(LolEsportsClient::new(
        &config.lolesports_gw_base,
        &config.lolesports_feed_base,
        &config.locale,
        config.lolesports_api_key.as_deref(),
        config.http_timeout(),
    )?);

    let schedule = ScheduleStream::new(
        pandascore.clone(),
        bus.clone(),
        Duration::from_secs(config.schedule_poll_secs),
        config.pagesize,
        config.leagues_whitelist.clone(),
    );
    let results = ResultsStream::new(
        pandascore,
        bus.clone(),
        Duration::from_secs(config.results_poll_secs),
        config.pagesize,
    );
    let live = LiveStream::new(
        lolesports,
        bus.clone(),
        Duration::from_secs(config.discover_poll_secs),
        Duration::from_secs(config.window_poll_secs),
        Duration::from_secs(config.details_poll_secs),
    );

    tokio::spawn(sink::consume(rx, sinks));
    tokio::spawn(schedule.run());
    tokio::spawn(results.run());
    tokio::spawn(live.run());

    info!("Ingestion pipeline running");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

async fn run_highlights(config: Config) -> Result<()> {
    let bootstrap = config
        .kafka_bootstrap
        .clone()
        .context("KAFKA_BOOTSTRAP is required for the highlights agent")?;

    let raw_landing = match &config.pg_dsn {
        Some(dsn) => Some(Arc::new(PgSink::connect(dsn).await?)),
        None => {
            warn!("PG_DSN not set - highlights land only on the broker");
            None
        }
    };

    let settings = AgentSettings {
        bootstrap,
        group_id: config.highlights_group.clone(),
        live_topic: config.live_topic.clone(),
        highlights_topic: config.highlights_topic.clone(),
        detector: config.detector_config(),
    };
    let agent = HighlightsAgent::new(settings, raw_landing)?;

    tokio::select! {
        result = agent.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
