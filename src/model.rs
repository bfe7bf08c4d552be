use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Logical stream tag carried in the envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "lol.schedule.upsert")]
    ScheduleUpsert,
    #[serde(rename = "lol.match.status")]
    MatchStatus,
    #[serde(rename = "lol.result.upsert")]
    ResultUpsert,
    #[serde(rename = "lol.live.window")]
    LiveWindow,
    #[serde(rename = "lol.live.details")]
    LiveDetails,
    #[serde(rename = "lol.highlight")]
    Highlight,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ScheduleUpsert => "lol.schedule.upsert",
            EventKind::MatchStatus => "lol.match.status",
            EventKind::ResultUpsert => "lol.result.upsert",
            EventKind::LiveWindow => "lol.live.window",
            EventKind::LiveDetails => "lol.live.details",
            EventKind::Highlight => "lol.highlight",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single event currency on the bus and at both sinks.
///
/// `payload` stays dynamic JSON: schedule/result payloads are a serialized
/// [`NormalizedMatch`], live window/details payloads are the raw provider
/// response, highlight payloads are built by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub key: String,
    pub payload: Value,
    pub source: String,
    pub version: String,
}

pub const SCHEMA_VERSION: &str = "1.0";

impl Envelope {
    /// Schedule/result envelope for a normalized match, keyed `match:<id>`.
    pub fn for_match(kind: EventKind, m: &NormalizedMatch) -> Self {
        Envelope {
            kind,
            at: Utc::now(),
            key: format!("match:{}", m.id),
            payload: serde_json::to_value(m).expect("NormalizedMatch serializes"),
            source: "pandascore".to_string(),
            version: SCHEMA_VERSION.to_string(),
        }
    }

    /// Live window/details envelope carrying the raw feed response.
    pub fn for_live(kind: EventKind, game_id: &str, payload: Value) -> Self {
        Envelope {
            kind,
            at: Utc::now(),
            key: format!("lolesports:game:{}", game_id),
            payload,
            source: "lolesports".to_string(),
            version: SCHEMA_VERSION.to_string(),
        }
    }

    /// Highlight envelope, keyed `highlight:<gameId>:<kind>`. The payload
    /// is assembled here so envelope and payload share one clock read.
    pub fn for_highlight(game_id: &str, highlight_kind: &str, teams: Value, meta: Value) -> Self {
        let at = Utc::now();
        Envelope {
            kind: EventKind::Highlight,
            at,
            key: format!("highlight:{}:{}", game_id, highlight_kind),
            payload: serde_json::json!({
                "game_id": game_id,
                "kind": highlight_kind,
                "at": at,
                "teams": teams,
                "meta": meta,
            }),
            source: "highlights".to_string(),
            version: SCHEMA_VERSION.to_string(),
        }
    }
}

/// SHA-256 over the canonical JSON serialization of a payload.
///
/// `serde_json` maps are key-ordered, so serialization is deterministic and
/// the hash is a stable content identity for dedup at the raw landing.
pub fn payload_hash(payload: &Value) -> Vec<u8> {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    Sha256::digest(&bytes).to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    NotStarted,
    Running,
    Finished,
    Canceled,
    Postponed,
    /// Absorbs upstream values we do not recognize.
    Unknown,
}

impl MatchStatus {
    pub fn from_upstream(s: &str) -> Self {
        match s {
            "not_started" => MatchStatus::NotStarted,
            "running" => MatchStatus::Running,
            "finished" => MatchStatus::Finished,
            "canceled" => MatchStatus::Canceled,
            "postponed" => MatchStatus::Postponed,
            _ => MatchStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::NotStarted => "not_started",
            MatchStatus::Running => "running",
            MatchStatus::Finished => "finished",
            MatchStatus::Canceled => "canceled",
            MatchStatus::Postponed => "postponed",
            MatchStatus::Unknown => "unknown",
        }
    }
}

/// Compact match shape published on schedule/result events and upserted
/// into the `matches` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMatch {
    pub id: i64,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub status: MatchStatus,
    /// True iff `status` is `running`.
    pub live: bool,
    pub best_of: Option<i64>,
    pub league_id: Option<i64>,
    pub league_slug: Option<String>,
    pub league: Option<String>,
    pub tournament_id: Option<i64>,
    pub tournament_slug: Option<String>,
    pub tournament: Option<String>,
    pub serie_id: Option<i64>,
    pub opponent1_id: Option<i64>,
    pub opponent1_slug: Option<String>,
    pub opponent1: Option<String>,
    pub opponent2_id: Option<i64>,
    pub opponent2_slug: Option<String>,
    pub opponent2: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub begin_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub winner_id: Option<i64>,
    pub forfeit: Option<bool>,
    pub draw: Option<bool>,
}

/// Normalize a PandaScore match object (or a previously-normalized payload)
/// into the canonical shape. Returns `None` when the upstream `id` is absent.
///
/// Accessors fall back from the upstream nesting (`league.name`,
/// `opponents[i].opponent.name`, `number_of_games`) to the flat normalized
/// keys, so re-normalizing an already-normalized payload is a no-op.
pub fn normalize_match(raw: &Value) -> Option<NormalizedMatch> {
    let id = raw.get("id")?.as_i64()?;
    let status = MatchStatus::from_upstream(raw.get("status").and_then(Value::as_str).unwrap_or(""));

    let (league_id, league_slug, league) = nested_entity(raw, "league");
    let (tournament_id, tournament_slug, tournament) = nested_entity(raw, "tournament");
    let (opponent1_id, opponent1_slug, opponent1) = opponent(raw, 0, "opponent1");
    let (opponent2_id, opponent2_slug, opponent2) = opponent(raw, 1, "opponent2");

    Some(NormalizedMatch {
        id,
        slug: str_field(raw, "slug"),
        name: str_field(raw, "name"),
        status,
        live: status == MatchStatus::Running,
        best_of: raw
            .get("number_of_games")
            .or_else(|| raw.get("best_of"))
            .and_then(Value::as_i64),
        league_id,
        league_slug,
        league,
        tournament_id,
        tournament_slug,
        tournament,
        serie_id: raw.get("serie_id").and_then(Value::as_i64),
        opponent1_id,
        opponent1_slug,
        opponent1,
        opponent2_id,
        opponent2_slug,
        opponent2,
        scheduled_at: ts_field(raw, "scheduled_at"),
        begin_at: ts_field(raw, "begin_at"),
        end_at: ts_field(raw, "end_at"),
        winner_id: raw.get("winner_id").and_then(Value::as_i64),
        forfeit: raw.get("forfeit").and_then(Value::as_bool),
        draw: raw.get("draw").and_then(Value::as_bool),
    })
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn ts_field(raw: &Value, key: &str) -> Option<DateTime<Utc>> {
    raw.get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

/// Read `{key}.{id,slug,name}` from the upstream nested object, falling back
/// to the flat `{key}_id` / `{key}_slug` / string `{key}` of normalized form.
fn nested_entity(raw: &Value, key: &str) -> (Option<i64>, Option<String>, Option<String>) {
    match raw.get(key) {
        Some(Value::Object(obj)) => (
            obj.get("id").and_then(Value::as_i64),
            obj.get("slug").and_then(Value::as_str).map(str::to_string),
            obj.get("name").and_then(Value::as_str).map(str::to_string),
        ),
        other => (
            raw.get(format!("{key}_id")).and_then(Value::as_i64),
            raw.get(format!("{key}_slug"))
                .and_then(Value::as_str)
                .map(str::to_string),
            other.and_then(Value::as_str).map(str::to_string),
        ),
    }
}

/// Read opponent `i` from the upstream `opponents` array, falling back to
/// the flat `opponentN*` keys of normalized form. Either side may be absent
/// for matches whose participants are not yet decided.
fn opponent(raw: &Value, i: usize, flat: &str) -> (Option<i64>, Option<String>, Option<String>) {
    if let Some(o) = raw
        .get("opponents")
        .and_then(Value::as_array)
        .and_then(|a| a.get(i))
        .and_then(|entry| entry.get("opponent"))
    {
        return (
            o.get("id").and_then(Value::as_i64),
            o.get("slug").and_then(Value::as_str).map(str::to_string),
            o.get("name").and_then(Value::as_str).map(str::to_string),
        );
    }
    (
        raw.get(format!("{flat}_id")).and_then(Value::as_i64),
        raw.get(format!("{flat}_slug"))
            .and_then(Value::as_str)
            .map(str::to_string),
        raw.get(flat).and_then(Value::as_str).map(str::to_string),
    )
}
