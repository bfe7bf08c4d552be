use anyhow::Result;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::lolesports::LolEsportsClient;
use crate::bus::EventBus;
use crate::model::{Envelope, EventKind};

/// Discovers live games via `getLive`, then tails `window` and `details`
/// incrementally with one task per active game.
///
/// The discovery loop owns the active set; a tailer observes its own
/// membership and exits naturally once discovery removes it.
pub struct LiveStream {
    client: Arc<LolEsportsClient>,
    bus: EventBus,
    discover_interval: Duration,
    window_interval: Duration,
    details_interval: Duration,
    active: Arc<RwLock<HashSet<String>>>,
    tails: HashMap<String, JoinHandle<()>>,
}

impl LiveStream {
    pub fn new(
        client: Arc<LolEsportsClient>,
        bus: EventBus,
        discover_interval: Duration,
        window_interval: Duration,
        details_interval: Duration,
    ) -> Self {
        LiveStream {
            client,
            bus,
            discover_interval,
            window_interval,
            details_interval,
            active: Arc::new(RwLock::new(HashSet::new())),
            tails: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.discover_tick().await {
                error!("Live discovery failed: {:#}", e);
            }
            sleep(self.discover_interval).await;
        }
    }

    /// Refresh the active set: spawn a tailer for every newly-live game,
    /// drop membership for games that left the live list.
    pub(crate) async fn discover_tick(&mut self) -> Result<()> {
        let data = self.client.get_live().await?;
        let live_now = collect_live_game_ids(&data);
        let current = self.active.read().await.clone();

        for game_id in live_now.difference(&current) {
            info!("start tailing live game {}", game_id);
            self.active.write().await.insert(game_id.clone());
            self.tails.insert(
                game_id.clone(),
                tokio::spawn(tail_game(
                    self.client.clone(),
                    self.bus.clone(),
                    self.active.clone(),
                    game_id.clone(),
                    self.window_interval,
                    self.details_interval,
                )),
            );
        }
        for game_id in current.difference(&live_now) {
            info!("mark game ended {}", game_id);
            self.active.write().await.remove(game_id);
            self.tails.remove(game_id);
        }
        self.tails.retain(|_, handle| !handle.is_finished());
        Ok(())
    }
}

/// Game ids in `inProgress` / `inProgressMedia` state, walked out of the
/// getLive response (`data.schedule.events[].match.games[]`).
pub(crate) fn collect_live_game_ids(data: &Value) -> HashSet<String> {
    let mut ids = HashSet::new();
    let events = data
        .pointer("/data/schedule/events")
        .and_then(Value::as_array);
    for ev in events.into_iter().flatten() {
        let games = ev.pointer("/match/games").and_then(Value::as_array);
        for game in games.into_iter().flatten() {
            let state = game.get("state").and_then(Value::as_str).unwrap_or("");
            if state != "inProgress" && state != "inProgressMedia" {
                continue;
            }
            let id = match game.get("id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            if let Some(id) = id {
                ids.insert(id);
            }
        }
    }
    ids
}

fn last_frame_timestamp(win: &Value) -> Option<String> {
    win.get("frames")?
        .as_array()?
        .last()?
        .get("rfc460Timestamp")?
        .as_str()
        .map(str::to_string)
}

/// Tail one game: poll `window` every iteration, `details` at its slower
/// cadence, publishing both. Poll failures (404 before frames exist,
/// transient feed errors) are logged and the loop keeps going.
async fn tail_game(
    client: Arc<LolEsportsClient>,
    bus: EventBus,
    active: Arc<RwLock<HashSet<String>>>,
    game_id: String,
    window_interval: Duration,
    details_interval: Duration,
) {
    let mut cursor: Option<String> = None;
    let mut last_details_at: Option<Instant> = None;

    while active.read().await.contains(&game_id) {
        match client.window(&game_id, cursor.as_deref()).await {
            Ok(win) => {
                if let Some(ts) = last_frame_timestamp(&win) {
                    cursor = Some(ts);
                }
                bus.publish(Envelope::for_live(EventKind::LiveWindow, &game_id, win));
            }
            Err(e) => warn!("window[{}] err: {:#}", game_id, e),
        }

        if last_details_at.map_or(true, |t| t.elapsed() >= details_interval) {
            last_details_at = Some(Instant::now());
            match client.details(&game_id, cursor.as_deref(), None).await {
                Ok(det) => {
                    bus.publish(Envelope::for_live(EventKind::LiveDetails, &game_id, det));
                }
                Err(e) => debug!("details[{}] err: {:#}", game_id, e),
            }
        }

        sleep(window_interval).await;
    }
    info!("stopped tailing game_id={}", game_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_collect_live_game_ids() {
        let data = json!({
            "data": {"schedule": {"events": [
                {"match": {"games": [
                    {"id": "g1", "state": "inProgress"},
                    {"id": "g2", "state": "completed"}
                ]}},
                {"match": {"games": [
                    {"id": "g3", "state": "inProgressMedia"},
                    {"state": "inProgress"}
                ]}}
            ]}}
        });
        let ids = collect_live_game_ids(&data);
        assert_eq!(
            ids,
            HashSet::from(["g1".to_string(), "g3".to_string()])
        );
    }

    #[test]
    fn test_collect_handles_empty_response() {
        assert!(collect_live_game_ids(&json!({})).is_empty());
        assert!(collect_live_game_ids(&json!({"data": {"schedule": {}}})).is_empty());
    }

    #[test]
    fn test_last_frame_timestamp_takes_final_frame() {
        let win = json!({"frames": [
            {"rfc460Timestamp": "2025-01-01T10:00:00Z"},
            {"rfc460Timestamp": "2025-01-01T10:00:10Z"}
        ]});
        assert_eq!(
            last_frame_timestamp(&win).as_deref(),
            Some("2025-01-01T10:00:10Z")
        );
        assert!(last_frame_timestamp(&json!({"frames": []})).is_none());
    }

    #[tokio::test]
    async fn test_tailer_advances_cursor_and_exits_when_inactive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/window/g1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "frames": [{"rfc460Timestamp": "2025-01-01T10:00:10Z"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/details/g1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"frames": []})))
            .mount(&server)
            .await;

        let client = Arc::new(
            LolEsportsClient::new(
                &server.uri(),
                &server.uri(),
                "en-US",
                None,
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        let (bus, mut rx) = EventBus::new(256);
        let active = Arc::new(RwLock::new(HashSet::from(["g1".to_string()])));

        let handle = tokio::spawn(tail_game(
            client,
            bus,
            active.clone(),
            "g1".to_string(),
            Duration::from_millis(10),
            Duration::from_secs(60),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        active.write().await.remove("g1");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("tailer must exit once inactive")
            .unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, EventKind::LiveWindow);
        assert_eq!(first.key, "lolesports:game:g1");

        // after the first window response the cursor must ride along
        let followed_up = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .any(|r| {
                r.url.path() == "/window/g1"
                    && r.url
                        .query_pairs()
                        .any(|(k, v)| k == "startingTime" && v == "2025-01-01T10:00:10Z")
            });
        assert!(followed_up);
    }
}
