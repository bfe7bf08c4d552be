use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::highlights::{Cooldowns, DetectorConfig};

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the ingestion pipeline: streams -> bus -> sinks (default)
    Ingest,
    /// Run the highlights agent against the live-window topic
    Highlights,
}

/// Real-time LoL esports telemetry ingestion pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "lol-esports-ingest", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// PandaScore API token (required for ingestion)
    #[arg(long, env = "PANDASCORE_TOKEN")]
    pub pandascore_token: Option<String>,

    /// PandaScore REST base URL
    #[arg(
        long,
        env = "PANDASCORE_BASE_URL",
        default_value = "https://api.pandascore.co"
    )]
    pub pandascore_base_url: String,

    /// Hourly request quota shared by all PandaScore calls
    #[arg(long, env = "PANDASCORE_REQUESTS_PER_HOUR", default_value = "950")]
    pub requests_per_hour: u32,

    /// Page size for paginated list calls (PandaScore caps at 500)
    #[arg(long, env = "PANDASCORE_PAGESIZE", default_value = "50")]
    pub pagesize: u32,

    /// Schedule stream poll period in seconds
    #[arg(long, env = "SCHEDULE_POLL_SECS", default_value = "60")]
    pub schedule_poll_secs: u64,

    /// Results stream poll period in seconds
    #[arg(long, env = "RESULTS_POLL_SECS", default_value = "90")]
    pub results_poll_secs: u64,

    /// Comma-separated league slugs; when set, the schedule stream only
    /// publishes matches from these leagues
    #[arg(long, env = "LEAGUES_WHITELIST", value_delimiter = ',')]
    pub leagues_whitelist: Vec<String>,

    /// LoL Esports persisted gateway base URL
    #[arg(
        long,
        env = "LOLESPORTS_GW_BASE",
        default_value = "https://esports-api.lolesports.com/persisted/gw"
    )]
    pub lolesports_gw_base: String,

    /// LoL Esports live-stats feed base URL
    #[arg(
        long,
        env = "LOLESPORTS_FEED_BASE",
        default_value = "https://feed.lolesports.com/livestats/v1"
    )]
    pub lolesports_feed_base: String,

    /// Locale passed to gateway calls
    #[arg(long, env = "LOLESPORTS_HL", default_value = "en-US")]
    pub locale: String,

    /// LoL Esports gateway API key (sent as x-api-key when set)
    #[arg(long, env = "LOLESPORTS_API_KEY")]
    pub lolesports_api_key: Option<String>,

    /// Live game discovery period in seconds
    #[arg(long, env = "DISCOVER_POLL_SECS", default_value = "20")]
    pub discover_poll_secs: u64,

    /// Window tailing period per live game, seconds
    #[arg(long, env = "WINDOW_POLL_SECS", default_value = "2")]
    pub window_poll_secs: u64,

    /// Details tailing period per live game, seconds
    #[arg(long, env = "DETAILS_POLL_SECS", default_value = "5")]
    pub details_poll_secs: u64,

    /// Upstream HTTP timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    /// Postgres DSN; when absent the relational sink is disabled
    #[arg(long, env = "PG_DSN")]
    pub pg_dsn: Option<String>,

    /// Kafka bootstrap servers; when absent the broker sink is disabled
    #[arg(long, env = "KAFKA_BOOTSTRAP")]
    pub kafka_bootstrap: Option<String>,

    /// Prometheus exposition port
    #[arg(long, env = "PROM_PORT", default_value = "9108")]
    pub prom_port: u16,

    /// Kafka consumer group of the highlights agent
    #[arg(long, env = "HIGHLIGHTS_GROUP", default_value = "lol-highlights")]
    pub highlights_group: String,

    /// Topic the highlights agent consumes live window frames from
    #[arg(long, env = "LIVE_TOPIC", default_value = "esports.lol.live.window")]
    pub live_topic: String,

    /// Topic the highlights agent produces to
    #[arg(long, env = "HIGHLIGHTS_TOPIC", default_value = "esports.lol.highlights")]
    pub highlights_topic: String,

    /// Sliding window for multi-kill detection, seconds
    #[arg(long, env = "MULTIKILL_WINDOW_SECS", default_value = "10")]
    pub multikill_window_secs: u64,

    /// Sliding window for comeback detection, seconds
    #[arg(long, env = "COMEBACK_WINDOW_SECS", default_value = "60")]
    pub comeback_window_secs: u64,

    /// Absolute gold swing that fires a comeback without a sign flip
    #[arg(long, env = "COMEBACK_SWING_GOLD", default_value = "4000")]
    pub comeback_swing_gold: i64,

    /// First-blood cooldown, seconds
    #[arg(long, env = "COOLDOWN_FIRST_BLOOD_SECS", default_value = "600")]
    pub cooldown_first_blood_secs: u64,

    /// Multi-kill cooldown per side, seconds
    #[arg(long, env = "COOLDOWN_MULTIKILL_SECS", default_value = "30")]
    pub cooldown_multikill_secs: u64,

    /// Baron-take cooldown per side, seconds
    #[arg(long, env = "COOLDOWN_BARON_SECS", default_value = "60")]
    pub cooldown_baron_secs: u64,

    /// Dragon-take cooldown per side, seconds
    #[arg(long, env = "COOLDOWN_DRAGON_SECS", default_value = "60")]
    pub cooldown_dragon_secs: u64,

    /// Tower-take cooldown per side, seconds
    #[arg(long, env = "COOLDOWN_TOWER_SECS", default_value = "30")]
    pub cooldown_tower_secs: u64,

    /// Inhibitor-take cooldown per side, seconds
    #[arg(long, env = "COOLDOWN_INHIBITOR_SECS", default_value = "30")]
    pub cooldown_inhibitor_secs: u64,

    /// Ace cooldown per side, seconds
    #[arg(long, env = "COOLDOWN_ACE_SECS", default_value = "60")]
    pub cooldown_ace_secs: u64,
}

impl Config {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Ingest)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.command() {
            Command::Ingest => {
                if self.pandascore_token.is_none() {
                    anyhow::bail!("PANDASCORE_TOKEN is required for ingestion");
                }
                if self.pagesize == 0 || self.pagesize > 500 {
                    anyhow::bail!("pagesize must be between 1 and 500");
                }
                if self.requests_per_hour == 0 {
                    anyhow::bail!("requests_per_hour must be positive");
                }
                for (name, value) in [
                    ("schedule_poll_secs", self.schedule_poll_secs),
                    ("results_poll_secs", self.results_poll_secs),
                    ("discover_poll_secs", self.discover_poll_secs),
                    ("window_poll_secs", self.window_poll_secs),
                    ("details_poll_secs", self.details_poll_secs),
                ] {
                    if value == 0 {
                        anyhow::bail!("{} must be positive", name);
                    }
                }
            }
            Command::Highlights => {
                if self.kafka_bootstrap.is_none() {
                    anyhow::bail!("KAFKA_BOOTSTRAP is required for the highlights agent");
                }
                if self.multikill_window_secs == 0 {
                    anyhow::bail!("multikill_window_secs must be positive");
                }
                if self.comeback_window_secs == 0 {
                    anyhow::bail!("comeback_window_secs must be positive");
                }
                if self.comeback_swing_gold <= 0 {
                    anyhow::bail!("comeback_swing_gold must be positive");
                }
            }
        }
        if self.http_timeout_secs == 0 || self.http_timeout_secs > 120 {
            anyhow::bail!("http_timeout_secs must be between 1 and 120");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            multikill_window: Duration::from_secs(self.multikill_window_secs),
            comeback_window: Duration::from_secs(self.comeback_window_secs),
            comeback_swing_gold: self.comeback_swing_gold,
            cooldowns: Cooldowns {
                first_blood: Duration::from_secs(self.cooldown_first_blood_secs),
                multikill: Duration::from_secs(self.cooldown_multikill_secs),
                baron: Duration::from_secs(self.cooldown_baron_secs),
                dragon: Duration::from_secs(self.cooldown_dragon_secs),
                tower: Duration::from_secs(self.cooldown_tower_secs),
                inhibitor: Duration::from_secs(self.cooldown_inhibitor_secs),
                ace: Duration::from_secs(self.cooldown_ace_secs),
            },
        }
    }
}
