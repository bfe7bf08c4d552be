use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

use super::state::{Counters, GameState, Side};

/// Per-detector suppression intervals.
#[derive(Debug, Clone)]
pub struct Cooldowns {
    pub first_blood: Duration,
    pub multikill: Duration,
    pub baron: Duration,
    pub dragon: Duration,
    pub tower: Duration,
    pub inhibitor: Duration,
    pub ace: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub multikill_window: Duration,
    pub comeback_window: Duration,
    pub comeback_swing_gold: i64,
    pub cooldowns: Cooldowns,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            multikill_window: Duration::from_secs(10),
            comeback_window: Duration::from_secs(60),
            comeback_swing_gold: 4000,
            cooldowns: Cooldowns {
                first_blood: Duration::from_secs(600),
                multikill: Duration::from_secs(30),
                baron: Duration::from_secs(60),
                dragon: Duration::from_secs(60),
                tower: Duration::from_secs(30),
                inhibitor: Duration::from_secs(30),
                ace: Duration::from_secs(60),
            },
        }
    }
}

/// A detected gameplay moment, ready to be wrapped in an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub kind: String,
    pub meta: Value,
}

// Candidate paths per counter, relative to the side's team object. The
// upstream frame schema has minor variants; the first non-null hit wins.
const KILLS: &[&str] = &["totalKills", "kills", "score.kills"];
const GOLD: &[&str] = &["totalGold", "gold.total", "score.gold"];
const BARONS: &[&str] = &["barons", "objectives.baron", "score.barons"];
const DRAGONS: &[&str] = &["dragons", "objectives.dragon.total", "score.dragons"];
const TOWERS: &[&str] = &["towers", "objectives.tower", "score.towers"];
const INHIBS: &[&str] = &["inhibitors", "objectives.inhibitor", "score.inhibitors"];

const BLUE_NAME: &[&str] = &["blueTeam.name", "gameMetadata.blueTeamName"];
const RED_NAME: &[&str] = &["redTeam.name", "gameMetadata.redTeamName"];

/// Walk a dotted path on dynamic JSON.
fn walk<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(value, |cur, seg| cur.get(seg))
        .filter(|v| !v.is_null())
}

fn pick<'a>(frame: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    candidates.iter().find_map(|path| walk(frame, path))
}

/// Coerce a counter value; anything non-numeric counts as 0.
fn as_count(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

fn side_counter(frame: &Value, side: Side, candidates: &[&str]) -> i64 {
    candidates
        .iter()
        .find_map(|c| walk(frame, &format!("{}.{}", side.frame_prefix(), c)))
        .map(as_count)
        .unwrap_or(0)
}

fn read_counters(frame: &Value, side: Side) -> Counters {
    Counters {
        kills: side_counter(frame, side, KILLS),
        gold: side_counter(frame, side, GOLD),
        barons: side_counter(frame, side, BARONS),
        dragons: side_counter(frame, side, DRAGONS),
        towers: side_counter(frame, side, TOWERS),
        inhibs: side_counter(frame, side, INHIBS),
    }
}

fn team_name(frame: &Value, candidates: &[&str], fallback: &str) -> String {
    pick(frame, candidates)
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

struct SidePair {
    blue: Counters,
    red: Counters,
}

impl SidePair {
    fn get(&self, side: Side) -> Counters {
        match side {
            Side::Blue => self.blue,
            Side::Red => self.red,
        }
    }
}

/// Run every detector against the newest frame, returning highlights in
/// detection order. The counter snapshot and frame cursor are overwritten
/// afterwards, so deltas are always current-vs-last-seen.
pub fn detect(
    state: &mut GameState,
    frame: &Value,
    cfg: &DetectorConfig,
    now: Instant,
) -> Vec<Highlight> {
    state.blue_team = team_name(frame, BLUE_NAME, "Blue");
    state.red_team = team_name(frame, RED_NAME, "Red");

    let cur = SidePair {
        blue: read_counters(frame, Side::Blue),
        red: read_counters(frame, Side::Red),
    };
    let mut out = Vec::new();

    detect_first_blood(state, &cur, cfg, now, &mut out);
    detect_multikills(state, &cur, cfg, now, &mut out);
    emit_deltas(state, &cur, |c| c.barons, "baron_taken", "baron", cfg.cooldowns.baron, now, &mut out);
    detect_dragons(state, &cur, cfg, now, &mut out);
    emit_deltas(state, &cur, |c| c.towers, "tower_taken", "tower", cfg.cooldowns.tower, now, &mut out);
    emit_deltas(state, &cur, |c| c.inhibs, "inhibitor_taken", "inhibitor", cfg.cooldowns.inhibitor, now, &mut out);
    detect_ace(state, &cur, cfg, now, &mut out);
    detect_comeback(state, &cur, cfg, now, &mut out);

    state.last_frame_ts = frame
        .get("rfc460Timestamp")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| state.last_frame_ts.take());
    state.set_counters(cur.blue, cur.red);
    out
}

fn detect_first_blood(
    state: &mut GameState,
    cur: &SidePair,
    cfg: &DetectorConfig,
    now: Instant,
    out: &mut Vec<Highlight>,
) {
    if state.first_blood_emitted || cur.blue.kills + cur.red.kills < 1 {
        return;
    }
    let side = if cur.blue.kills > 0 { Side::Blue } else { Side::Red };
    out.push(Highlight {
        kind: "first_blood".to_string(),
        meta: json!({"side": side.as_str(), "team": state.team_name(side)}),
    });
    state.first_blood_emitted = true;
    state.arm_cooldown("first_blood", cfg.cooldowns.first_blood, now);
}

fn detect_multikills(
    state: &mut GameState,
    cur: &SidePair,
    cfg: &DetectorConfig,
    now: Instant,
    out: &mut Vec<Highlight>,
) {
    for side in Side::BOTH {
        let delta = cur.get(side).kills - state.counters(side).kills;
        for _ in 0..delta.max(0) {
            state.kill_buffer.push((now, side));
        }
    }
    state.prune_kill_buffer(cfg.multikill_window, now);

    for side in Side::BOTH {
        let k = state.kills_in_window(side);
        let cd = format!("multikill_{}", side.as_str());
        if k >= 2 && !state.on_cooldown(&cd, now) {
            let kind = match k.min(5) {
                2 => "double_kill",
                3 => "triple_kill",
                4 => "quadra_kill",
                _ => "penta_kill",
            };
            out.push(Highlight {
                kind: kind.to_string(),
                meta: json!({
                    "side": side.as_str(),
                    "team": state.team_name(side),
                    "kills_in_window": k,
                }),
            });
            state.arm_cooldown(&cd, cfg.cooldowns.multikill, now);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_deltas(
    state: &mut GameState,
    cur: &SidePair,
    field: fn(&Counters) -> i64,
    kind: &str,
    cd_key: &str,
    cooldown: Duration,
    now: Instant,
    out: &mut Vec<Highlight>,
) {
    for side in Side::BOTH {
        let delta = field(&cur.get(side)) - field(&state.counters(side));
        let cd = format!("{}_{}", cd_key, side.as_str());
        if delta > 0 && !state.on_cooldown(&cd, now) {
            out.push(Highlight {
                kind: kind.to_string(),
                meta: json!({
                    "side": side.as_str(),
                    "team": state.team_name(side),
                    "delta": delta,
                }),
            });
            state.arm_cooldown(&cd, cooldown, now);
        }
    }
}

/// Dragon takes, upgraded to `dragon_soul` once a side reaches four.
fn detect_dragons(
    state: &mut GameState,
    cur: &SidePair,
    cfg: &DetectorConfig,
    now: Instant,
    out: &mut Vec<Highlight>,
) {
    for side in Side::BOTH {
        let total = cur.get(side).dragons;
        let cd = format!("dragon_{}", side.as_str());
        if total > state.counters(side).dragons && !state.on_cooldown(&cd, now) {
            let kind = if total >= 4 { "dragon_soul" } else { "dragon_taken" };
            out.push(Highlight {
                kind: kind.to_string(),
                meta: json!({
                    "side": side.as_str(),
                    "team": state.team_name(side),
                    "total_dragons": total,
                }),
            });
            state.arm_cooldown(&cd, cfg.cooldowns.dragon, now);
        }
    }
}

/// Team-wipe heuristic: five kills for one side in a single poll interval
/// while the opponent picked up none.
fn detect_ace(
    state: &mut GameState,
    cur: &SidePair,
    cfg: &DetectorConfig,
    now: Instant,
    out: &mut Vec<Highlight>,
) {
    for side in Side::BOTH {
        let opp = side.opponent();
        let dk_side = cur.get(side).kills - state.counters(side).kills;
        let dk_opp = cur.get(opp).kills - state.counters(opp).kills;
        let cd = format!("ace_{}", side.as_str());
        if dk_side >= 5 && dk_opp == 0 && !state.on_cooldown(&cd, now) {
            out.push(Highlight {
                kind: "ace".to_string(),
                meta: json!({"side": side.as_str(), "team": state.team_name(side)}),
            });
            state.arm_cooldown(&cd, cfg.cooldowns.ace, now);
        }
    }
}

/// Gold-diff sign flip or a swing past the threshold across the window.
fn detect_comeback(
    state: &mut GameState,
    cur: &SidePair,
    cfg: &DetectorConfig,
    now: Instant,
    out: &mut Vec<Highlight>,
) {
    let diff = cur.blue.gold - cur.red.gold;
    state.gold_window.push((now, diff));
    state.prune_gold_window(cfg.comeback_window, now);
    if state.gold_window.len() < 2 {
        return;
    }
    let (_, d0) = state.gold_window[0];
    let flipped = (d0 <= 0 && diff > 0) || (d0 >= 0 && diff < 0);
    if (flipped || (diff - d0).abs() >= cfg.comeback_swing_gold)
        && !state.on_cooldown("comeback", now)
    {
        out.push(Highlight {
            kind: "comeback_swing".to_string(),
            meta: json!({"from": d0, "to": diff}),
        });
        // no dedicated knob for this one; the dragon cooldown paces it
        state.arm_cooldown("comeback", cfg.cooldowns.dragon, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(blue_kills: i64, red_kills: i64, blue_gold: i64, red_gold: i64) -> Value {
        json!({
            "rfc460Timestamp": "2025-01-01T10:00:00Z",
            "blueTeam": {"name": "T1", "totalKills": blue_kills, "totalGold": blue_gold},
            "redTeam": {"name": "GEN", "totalKills": red_kills, "totalGold": red_gold}
        })
    }

    fn kinds(highlights: &[Highlight]) -> Vec<&str> {
        highlights.iter().map(|h| h.kind.as_str()).collect()
    }

    #[test]
    fn test_first_blood_then_double_kill() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        let t0 = Instant::now();

        assert!(detect(&mut state, &frame(0, 0, 0, 0), &cfg, t0).is_empty());

        let second = detect(&mut state, &frame(1, 0, 0, 0), &cfg, t0 + Duration::from_secs(1));
        assert_eq!(kinds(&second), vec!["first_blood"]);
        assert_eq!(second[0].meta["side"], json!("blue"));
        assert_eq!(second[0].meta["team"], json!("T1"));

        let third = detect(&mut state, &frame(2, 0, 0, 0), &cfg, t0 + Duration::from_secs(2));
        assert_eq!(kinds(&third), vec!["double_kill"]);
        assert_eq!(third[0].meta["kills_in_window"], json!(2));
        assert!(state.first_blood_emitted);
    }

    #[test]
    fn test_first_blood_is_one_shot() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        let t0 = Instant::now();

        detect(&mut state, &frame(1, 0, 0, 0), &cfg, t0);
        for i in 2..10 {
            let out = detect(
                &mut state,
                &frame(i, 0, 0, 0),
                &cfg,
                t0 + Duration::from_secs(3600 * i as u64),
            );
            assert!(!kinds(&out).contains(&"first_blood"));
        }
    }

    #[test]
    fn test_multikill_band_does_not_refire_within_cooldown() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        state.first_blood_emitted = true;
        let t0 = Instant::now();

        detect(&mut state, &frame(0, 0, 0, 0), &cfg, t0);
        let two = detect(&mut state, &frame(2, 0, 0, 0), &cfg, t0 + Duration::from_secs(1));
        assert_eq!(kinds(&two), vec!["double_kill"]);

        // third kill arrives inside the window but the cooldown is armed
        let three = detect(&mut state, &frame(3, 0, 0, 0), &cfg, t0 + Duration::from_secs(2));
        assert!(three.is_empty());
    }

    #[test]
    fn test_kills_outside_window_do_not_band() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        state.first_blood_emitted = true;
        let t0 = Instant::now();

        detect(&mut state, &frame(0, 0, 0, 0), &cfg, t0);
        detect(&mut state, &frame(1, 0, 0, 0), &cfg, t0 + Duration::from_secs(1));
        // second kill lands after the first aged out of the 10 s window
        let late = detect(&mut state, &frame(2, 0, 0, 0), &cfg, t0 + Duration::from_secs(20));
        assert!(late.is_empty());
    }

    #[test]
    fn test_baron_delta_fires_once_per_cooldown() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        let t0 = Instant::now();

        let base = json!({"blueTeam": {"barons": 0}, "redTeam": {"barons": 0}});
        detect(&mut state, &base, &cfg, t0);

        let taken = json!({"blueTeam": {"barons": 1}, "redTeam": {"barons": 0}});
        let out = detect(&mut state, &taken, &cfg, t0 + Duration::from_secs(1));
        assert_eq!(kinds(&out), vec!["baron_taken"]);
        assert_eq!(out[0].meta["delta"], json!(1));

        // another take inside the cooldown is swallowed
        let again = json!({"blueTeam": {"barons": 2}, "redTeam": {"barons": 0}});
        assert!(detect(&mut state, &again, &cfg, t0 + Duration::from_secs(30)).is_empty());

        // and fires again once the cooldown expires
        let later = json!({"blueTeam": {"barons": 3}, "redTeam": {"barons": 0}});
        let out = detect(&mut state, &later, &cfg, t0 + Duration::from_secs(120));
        assert_eq!(kinds(&out), vec!["baron_taken"]);
    }

    #[test]
    fn test_fourth_dragon_is_a_soul() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        let mut t = Instant::now();

        for total in 1..=4i64 {
            let f = json!({"blueTeam": {"dragons": total}, "redTeam": {"dragons": 0}});
            let out = detect(&mut state, &f, &cfg, t);
            let expected = if total >= 4 { "dragon_soul" } else { "dragon_taken" };
            assert_eq!(kinds(&out), vec![expected]);
            assert_eq!(out[0].meta["total_dragons"], json!(total));
            t += Duration::from_secs(120);
        }
    }

    #[test]
    fn test_ace_requires_quiet_opponent() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        state.first_blood_emitted = true;
        let t0 = Instant::now();

        detect(&mut state, &frame(0, 0, 0, 0), &cfg, t0);
        let out = detect(&mut state, &frame(5, 0, 0, 0), &cfg, t0 + Duration::from_secs(1));
        assert!(kinds(&out).contains(&"ace"));

        // a trade is not an ace
        let mut state = GameState::new();
        state.first_blood_emitted = true;
        detect(&mut state, &frame(0, 0, 0, 0), &cfg, t0);
        let out = detect(&mut state, &frame(5, 1, 0, 0), &cfg, t0 + Duration::from_secs(1));
        assert!(!kinds(&out).contains(&"ace"));
    }

    #[test]
    fn test_comeback_fires_once_on_sign_flip() {
        let cfg = DetectorConfig {
            comeback_window: Duration::from_secs(30),
            ..DetectorConfig::default()
        };
        let mut state = GameState::new();
        state.first_blood_emitted = true;
        let t0 = Instant::now();

        assert!(detect(&mut state, &frame(0, 0, 0, 3000), &cfg, t0).is_empty());
        assert!(detect(&mut state, &frame(0, 0, 0, 500), &cfg, t0 + Duration::from_secs(1))
            .is_empty());

        let out = detect(&mut state, &frame(0, 0, 200, 0), &cfg, t0 + Duration::from_secs(2));
        assert_eq!(kinds(&out), vec!["comeback_swing"]);
        assert_eq!(out[0].meta["from"], json!(-3000));
        assert_eq!(out[0].meta["to"], json!(200));

        // within the cooldown further swings stay quiet
        let out = detect(&mut state, &frame(0, 0, 0, 400), &cfg, t0 + Duration::from_secs(3));
        assert!(out.is_empty());
    }

    #[test]
    fn test_comeback_fires_on_large_swing_without_flip() {
        let cfg = DetectorConfig {
            comeback_window: Duration::from_secs(30),
            comeback_swing_gold: 4000,
            ..DetectorConfig::default()
        };
        let mut state = GameState::new();
        state.first_blood_emitted = true;
        let t0 = Instant::now();

        detect(&mut state, &frame(0, 0, 10_000, 0), &cfg, t0);
        let out = detect(&mut state, &frame(0, 0, 1000, 0), &cfg, t0 + Duration::from_secs(5));
        assert_eq!(kinds(&out), vec!["comeback_swing"]);
    }

    #[test]
    fn test_counters_tolerate_schema_variants() {
        let variants = [
            json!({"blueTeam": {"totalKills": 3}}),
            json!({"blueTeam": {"kills": 3}}),
            json!({"blueTeam": {"score": {"kills": 3}}}),
            json!({"blueTeam": {"totalKills": "3"}}),
        ];
        for frame in &variants {
            assert_eq!(side_counter(frame, Side::Blue, KILLS), 3, "{frame}");
        }
        assert_eq!(
            side_counter(&json!({"blueTeam": {"totalKills": null}}), Side::Blue, KILLS),
            0
        );
        assert_eq!(side_counter(&json!({}), Side::Blue, KILLS), 0);
        assert_eq!(
            side_counter(
                &json!({"blueTeam": {"objectives": {"dragon": {"total": 2}}}}),
                Side::Blue,
                DRAGONS
            ),
            2
        );
    }

    #[test]
    fn test_team_names_fall_back_to_side_literals() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        detect(&mut state, &json!({}), &cfg, Instant::now());
        assert_eq!(state.blue_team, "Blue");
        assert_eq!(state.red_team, "Red");

        let meta_only = json!({"gameMetadata": {"blueTeamName": "DK", "redTeamName": "KT"}});
        detect(&mut state, &meta_only, &cfg, Instant::now());
        assert_eq!(state.blue_team, "DK");
        assert_eq!(state.red_team, "KT");
    }

    #[test]
    fn test_cursor_follows_frame_timestamp() {
        let cfg = DetectorConfig::default();
        let mut state = GameState::new();
        detect(&mut state, &frame(0, 0, 0, 0), &cfg, Instant::now());
        assert_eq!(state.last_frame_ts.as_deref(), Some("2025-01-01T10:00:00Z"));

        // a frame without a timestamp keeps the previous cursor
        detect(&mut state, &json!({}), &cfg, Instant::now());
        assert_eq!(state.last_frame_ts.as_deref(), Some("2025-01-01T10:00:00Z"));
    }
}
