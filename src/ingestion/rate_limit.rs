use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

const WINDOW: Duration = Duration::from_secs(3600);

/// Hour-window limiter: N tokens, replenished to capacity at the start of
/// each hour window. `take` blocks until a token is available.
pub struct HourlyTokenBucket {
    capacity: u32,
    state: Mutex<State>,
}

struct State {
    tokens: u32,
    reset_at: Instant,
}

impl HourlyTokenBucket {
    pub fn new(capacity: u32) -> Self {
        HourlyTokenBucket {
            capacity,
            state: Mutex::new(State {
                tokens: capacity,
                reset_at: Instant::now() + WINDOW,
            }),
        }
    }

    /// Take one token, sleeping until the window resets when exhausted.
    /// The lock is never held across a sleep.
    pub async fn take(&self) {
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                let now = Instant::now();
                if now >= st.reset_at {
                    st.tokens = self.capacity;
                    st.reset_at = now + WINDOW;
                }
                if st.tokens > 0 {
                    st.tokens -= 1;
                    return;
                }
                st.reset_at.duration_since(now)
            };
            sleep(wait.max(Duration::from_millis(100))).await;
        }
    }
}
