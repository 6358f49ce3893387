use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MINUTE_WINDOW_SECS: u64 = 60;
const DAY_WINDOW_SECS: u64 = 86_400;

/// Clock seam so tests can drive window resets deterministically
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn now(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[derive(Debug)]
struct Windows {
    minute_start: u64,
    minute_count: u32,
    day_start: u64,
    day_count: u32,
}

/// Two-window call budget for one external data provider.
///
/// A call is admitted only while both the rolling minute counter and the
/// rolling day counter are under their caps; a denied call never mutates
/// either counter. One instance per provider, shared across tasks.
pub struct RateLimiter {
    per_minute: u32,
    per_day: u32,
    clock: Arc<dyn Clock>,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        Self::with_clock(per_minute, per_day, Arc::new(SystemClock))
    }

    pub fn with_clock(per_minute: u32, per_day: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            per_minute,
            per_day,
            clock,
            windows: Mutex::new(Windows {
                minute_start: now,
                minute_count: 0,
                day_start: now,
                day_count: 0,
            }),
        }
    }

    /// Admit one call if both budgets have headroom
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut w = self.windows.lock().unwrap();

        if now.saturating_sub(w.minute_start) >= MINUTE_WINDOW_SECS {
            w.minute_start = now;
            w.minute_count = 0;
        }
        if now.saturating_sub(w.day_start) >= DAY_WINDOW_SECS {
            w.day_start = now;
            w.day_count = 0;
        }

        if w.minute_count < self.per_minute && w.day_count < self.per_day {
            w.minute_count += 1;
            w.day_count += 1;
            true
        } else {
            false
        }
    }

    /// Like [`allow`](Self::allow), but on denial waits out the remainder of
    /// the current minute window (at most one full window) and retries once.
    pub async fn blocking_allow(&self) -> bool {
        if self.allow() {
            return true;
        }

        let wait_secs = {
            let w = self.windows.lock().unwrap();
            let elapsed = self.clock.now().saturating_sub(w.minute_start);
            MINUTE_WINDOW_SECS
                .saturating_sub(elapsed)
                .min(MINUTE_WINDOW_SECS)
        };
        tokio::time::sleep(Duration::from_secs(wait_secs)).await;

        self.allow()
    }
}
