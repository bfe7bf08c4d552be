use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Client for the LoL Esports live-telemetry APIs: the persisted gateway
/// (`getLive`, `getEventDetails`) and the livestats feed (`window`,
/// `details`). No quota; failures are handled by the polling loops.
pub struct LolEsportsClient {
    http: Client,
    gw_base: String,
    feed_base: String,
    hl: String,
}

impl LolEsportsClient {
    pub fn new(
        gw_base: &str,
        feed_base: &str,
        hl: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert(
                "x-api-key",
                HeaderValue::from_str(key).context("Invalid LoL Esports API key")?,
            );
        }
        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(LolEsportsClient {
            http,
            gw_base: gw_base.trim_end_matches('/').to_string(),
            feed_base: feed_base.trim_end_matches('/').to_string(),
            hl: hl.to_string(),
        })
    }

    /// Currently scheduled/live events, including per-game state.
    pub async fn get_live(&self) -> Result<Value> {
        self.get_json(
            format!("{}/getLive", self.gw_base),
            &[("hl", self.hl.as_str())],
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn get_event_details(&self, match_id: &str) -> Result<Value> {
        self.get_json(
            format!("{}/getEventDetails", self.gw_base),
            &[("hl", self.hl.as_str()), ("id", match_id)],
        )
        .await
    }

    /// Window frames for a game; `starting_time` resumes from a cursor.
    pub async fn window(&self, game_id: &str, starting_time: Option<&str>) -> Result<Value> {
        let mut params = Vec::new();
        if let Some(ts) = starting_time {
            params.push(("startingTime", ts));
        }
        self.get_json(format!("{}/window/{}", self.feed_base, game_id), &params)
            .await
    }

    /// Per-participant details; heavier than `window`, polled less often.
    pub async fn details(
        &self,
        game_id: &str,
        starting_time: Option<&str>,
        participant_ids: Option<&str>,
    ) -> Result<Value> {
        let mut params = Vec::new();
        if let Some(ts) = starting_time {
            params.push(("startingTime", ts));
        }
        if let Some(ids) = participant_ids {
            params.push(("participantIds", ids));
        }
        self.get_json(format!("{}/details/{}", self.feed_base, game_id), &params)
            .await
    }

    async fn get_json(&self, url: String, params: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("LoL Esports request failed: {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("LoL Esports error {}: {}", resp.status(), url);
        }
        resp.json()
            .await
            .context("Failed to parse LoL Esports response")
    }
}
