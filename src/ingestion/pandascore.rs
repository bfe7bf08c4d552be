use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use super::rate_limit::HourlyTokenBucket;
use super::retry::{with_retries, ApiError};
use crate::metrics;

/// Client for the PandaScore REST API (schedule + results).
///
/// Every call is metered by the shared hourly token bucket before it goes
/// out, then wrapped in the retry policy. List endpoints return JSON arrays.
pub struct PandaScoreClient {
    http: Client,
    base_url: String,
    token: String,
    bucket: HourlyTokenBucket,
}

impl PandaScoreClient {
    pub fn new(
        base_url: &str,
        token: &str,
        requests_per_hour: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(PandaScoreClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            bucket: HourlyTokenBucket::new(requests_per_hour),
        })
    }

    pub async fn list_upcoming_matches(&self, page: u32, per_page: u32) -> Result<Vec<Value>> {
        self.get_page(
            "/lol/matches/upcoming",
            vec![
                ("page".into(), page.to_string()),
                ("per_page".into(), per_page.to_string()),
                ("sort".into(), "begin_at".into()),
            ],
        )
        .await
    }

    pub async fn list_running_matches(&self, page: u32, per_page: u32) -> Result<Vec<Value>> {
        self.get_page(
            "/lol/matches/running",
            vec![
                ("page".into(), page.to_string()),
                ("per_page".into(), per_page.to_string()),
                ("sort".into(), "begin_at".into()),
            ],
        )
        .await
    }

    /// Finished matches, newest first. `since_iso` bounds `end_at` from
    /// below (the trailing comma makes it an open-ended range filter).
    pub async fn list_past_matches(
        &self,
        page: u32,
        per_page: u32,
        since_iso: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut params = vec![
            ("page".into(), page.to_string()),
            ("per_page".into(), per_page.to_string()),
            ("sort".into(), "-end_at".into()),
            ("filter[status]".into(), "finished".into()),
        ];
        if let Some(since) = since_iso {
            params.push(("range[end_at]".into(), format!("{since},")));
        }
        self.get_page("/lol/matches/past", params).await
    }

    async fn get_page(&self, endpoint: &str, params: Vec<(String, String)>) -> Result<Vec<Value>> {
        self.bucket.take().await;
        let label = endpoint.trim_matches('/').replace('/', "_");
        let url = format!("{}{}", self.base_url, endpoint);
        let retry_label = label.clone();
        with_retries(&retry_label, move || {
            self.fetch(url.clone(), params.clone(), label.clone())
        })
        .await
        .with_context(|| format!("PandaScore {} request failed", endpoint))
    }

    async fn fetch(
        &self,
        url: String,
        mut params: Vec<(String, String)>,
        label: String,
    ) -> Result<Vec<Value>, ApiError> {
        params.push(("token".into(), self.token.clone()));
        metrics::REQUESTS_TOTAL.with_label_values(&[&label]).inc();
        let timer = metrics::REQUEST_LATENCY
            .with_label_values(&[&label])
            .start_timer();
        let result = self.http.get(&url).query(&params).send().await;
        timer.observe_duration();

        let resp = result?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            metrics::REQUESTS_ERRORS
                .with_label_values(&[&label, status.as_str()])
                .inc();
            warn!("HTTP {} {}", status, url);
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ApiError::Status {
                status,
                retry_after,
            });
        }
        Ok(resp.json::<Vec<Value>>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PandaScoreClient {
        PandaScoreClient::new(&server.uri(), "secret", 950, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_token_and_params_are_appended() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lol/matches/upcoming"))
            .and(query_param("token", "secret"))
            .and(query_param("page", "2"))
            .and(query_param("per_page", "50"))
            .and(query_param("sort", "begin_at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        let rows = client(&server).list_upcoming_matches(2, 50).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn test_past_matches_carry_range_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lol/matches/past"))
            .and(query_param("filter[status]", "finished"))
            .and(query_param("sort", "-end_at"))
            .and(query_param("range[end_at]", "2025-01-01T00:00:00Z,"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let rows = client(&server)
            .list_past_matches(1, 50, Some("2025-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lol/matches/upcoming"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        assert!(client(&server).list_upcoming_matches(1, 50).await.is_err());
    }
}
