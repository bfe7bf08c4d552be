use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use super::pandascore::PandaScoreClient;
use crate::bus::EventBus;
use crate::model::{normalize_match, Envelope, EventKind};

/// Polls recently finished matches and publishes result upserts.
///
/// A single persistent cursor bounds `end_at` from below. After any tick
/// that saw data the cursor advances to one hour before now: results can be
/// corrected late, so the last hour is re-observed every tick and the
/// idempotent upserts downstream absorb the repeats.
pub struct ResultsStream {
    client: Arc<PandaScoreClient>,
    bus: EventBus,
    poll_interval: Duration,
    pagesize: u32,
    since: Option<DateTime<Utc>>,
}

impl ResultsStream {
    pub fn new(
        client: Arc<PandaScoreClient>,
        bus: EventBus,
        poll_interval: Duration,
        pagesize: u32,
    ) -> Self {
        ResultsStream {
            client,
            bus,
            poll_interval,
            pagesize,
            since: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.tick().await {
                error!("Results poll failed: {:#}", e);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub(crate) async fn tick(&mut self) -> Result<()> {
        let since_iso = self
            .since
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
        let mut page = 1u32;
        let mut got_any = false;
        loop {
            let matches = self
                .client
                .list_past_matches(page, self.pagesize, since_iso.as_deref())
                .await?;
            if matches.is_empty() {
                break;
            }
            got_any = true;
            for raw in &matches {
                if let Some(norm) = normalize_match(raw) {
                    self.bus
                        .publish(Envelope::for_match(EventKind::ResultUpsert, &norm));
                }
            }
            if (matches.len() as u32) < self.pagesize {
                break;
            }
            page += 1;
        }
        if got_any {
            self.since = Some(Utc::now() - chrono::Duration::hours(1));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_past(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/lol/matches/past"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn stream(server: &MockServer, bus: EventBus) -> ResultsStream {
        let client = Arc::new(
            PandaScoreClient::new(&server.uri(), "t", 950, Duration::from_secs(5)).unwrap(),
        );
        ResultsStream::new(client, bus, Duration::from_secs(90), 50)
    }

    fn range_param(req: &wiremock::Request) -> Option<String> {
        req.url
            .query_pairs()
            .find(|(k, _)| k == "range[end_at]")
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_finished_match_publishes_result_upsert() {
        let server = MockServer::start().await;
        mount_past(
            &server,
            json!([{
                "id": 9,
                "status": "finished",
                "end_at": "2025-01-01T12:00:00Z",
                "winner_id": 77
            }]),
        )
        .await;

        let (bus, mut rx) = EventBus::new(64);
        let mut stream = stream(&server, bus);
        stream.tick().await.unwrap();

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::ResultUpsert);
        assert_eq!(ev.key, "match:9");
        assert_eq!(ev.payload["winner_id"], json!(77));
    }

    #[tokio::test]
    async fn test_cursor_advances_after_data_and_bounds_next_request() {
        let server = MockServer::start().await;
        mount_past(&server, json!([{"id": 9, "status": "finished"}])).await;

        let (bus, _rx) = EventBus::new(64);
        let mut stream = stream(&server, bus);
        stream.tick().await.unwrap();
        stream.tick().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(range_param(&requests[0]).is_none());

        let range = range_param(&requests[1]).expect("second tick must carry the cursor");
        assert!(range.ends_with(','));
        let cursor: DateTime<Utc> = range.trim_end_matches(',').parse().unwrap();
        let age = Utc::now() - cursor;
        assert!(age >= chrono::Duration::minutes(59) && age <= chrono::Duration::minutes(61));
    }

    #[tokio::test]
    async fn test_empty_tick_leaves_cursor_unset() {
        let server = MockServer::start().await;
        mount_past(&server, json!([])).await;

        let (bus, _rx) = EventBus::new(64);
        let mut stream = stream(&server, bus);
        stream.tick().await.unwrap();
        stream.tick().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| range_param(r).is_none()));
    }
}
