use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Blue,
    Red,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Blue, Side::Red];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Blue => "blue",
            Side::Red => "red",
        }
    }

    pub fn opponent(&self) -> Side {
        match self {
            Side::Blue => Side::Red,
            Side::Red => Side::Blue,
        }
    }

    /// Key prefix of this side's team object in window frames.
    pub(crate) fn frame_prefix(&self) -> &'static str {
        match self {
            Side::Blue => "blueTeam",
            Side::Red => "redTeam",
        }
    }
}

/// Aggregate per-team counters read from a window frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub kills: i64,
    pub gold: i64,
    pub barons: i64,
    pub dragons: i64,
    pub towers: i64,
    pub inhibs: i64,
}

/// Detector state for one game; lives from the first observed frame until
/// the process ends.
#[derive(Debug)]
pub struct GameState {
    /// `rfc460Timestamp` of the last inspected frame.
    pub last_frame_ts: Option<String>,
    pub blue_team: String,
    pub red_team: String,
    blue: Counters,
    red: Counters,
    cooldown_until: HashMap<String, Instant>,
    pub first_blood_emitted: bool,
    pub kill_buffer: Vec<(Instant, Side)>,
    pub gold_window: Vec<(Instant, i64)>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        GameState {
            last_frame_ts: None,
            blue_team: "Blue".to_string(),
            red_team: "Red".to_string(),
            blue: Counters::default(),
            red: Counters::default(),
            cooldown_until: HashMap::new(),
            first_blood_emitted: false,
            kill_buffer: Vec::new(),
            gold_window: Vec::new(),
        }
    }

    pub fn team_name(&self, side: Side) -> &str {
        match side {
            Side::Blue => &self.blue_team,
            Side::Red => &self.red_team,
        }
    }

    pub fn counters(&self, side: Side) -> Counters {
        match side {
            Side::Blue => self.blue,
            Side::Red => self.red,
        }
    }

    pub fn set_counters(&mut self, blue: Counters, red: Counters) {
        self.blue = blue;
        self.red = red;
    }

    pub fn on_cooldown(&self, key: &str, now: Instant) -> bool {
        self.cooldown_until.get(key).is_some_and(|until| *until > now)
    }

    pub fn arm_cooldown(&mut self, key: &str, duration: Duration, now: Instant) {
        self.cooldown_until.insert(key.to_string(), now + duration);
    }

    /// Drop kill entries older than the sliding window; what remains all
    /// lies in `(now - window, now]`.
    pub fn prune_kill_buffer(&mut self, window: Duration, now: Instant) {
        self.kill_buffer
            .retain(|(t, _)| now.duration_since(*t) < window);
    }

    pub fn kills_in_window(&self, side: Side) -> usize {
        self.kill_buffer.iter().filter(|(_, s)| *s == side).count()
    }

    pub fn prune_gold_window(&mut self, window: Duration, now: Instant) {
        self.gold_window
            .retain(|(t, _)| now.duration_since(*t) < window);
    }
}
