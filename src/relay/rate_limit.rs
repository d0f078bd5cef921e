use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::websocket::ConnectionId;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_size: Duration,
    pub max_messages: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::from_secs(10),
            max_messages: 10,
        }
    }
}

/// Counter over a window aligned to the connection's first message. The
/// window jumps forward in whole steps; it never slides.
#[derive(Debug)]
struct FixedWindow {
    started: Instant,
    count: u32,
}

impl FixedWindow {
    fn new(now: Instant) -> Self {
        Self { started: now, count: 0 }
    }

    fn roll(&mut self, now: Instant, window_size: Duration) {
        let elapsed = now.duration_since(self.started);
        if elapsed < window_size {
            return;
        }
        let periods = elapsed.as_nanos() / window_size.as_nanos();
        let skipped = Duration::from_nanos((window_size.as_nanos() * periods) as u64);
        self.started += skipped;
        self.count = 0;
    }
}

/// Per-connection fixed-window limiter for relayed chat.
pub struct RateLimiter {
    windows: Arc<RwLock<HashMap<ConnectionId, FixedWindow>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(mut config: RateLimitConfig) -> Self {
        config.window_size = config.window_size.max(Duration::from_millis(1));
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Counts one message for `id`; false once the window's budget is spent.
    pub async fn check_rate_limit(&self, id: ConnectionId) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.write().await;

        let window = windows.entry(id).or_insert_with(|| FixedWindow::new(now));
        window.roll(now, self.config.window_size);

        if window.count < self.config.max_messages {
            window.count += 1;
            true
        } else {
            false
        }
    }

    pub async fn forget(&self, id: &ConnectionId) {
        self.windows.write().await.remove(id);
    }

    #[cfg(test)]
    pub async fn tracked(&self) -> usize {
        self.windows.read().await.len()
    }
}
