//! Per-connection sliding-window message rate limiting

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Sliding-window message budget, keyed strictly per connection so one
/// noisy client cannot degrade delivery to others.
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Vec<Instant>>>,
    max_messages: u32,
    window_duration: Duration,
}

impl RateLimiter {
    pub fn new(max_messages: u32, window_duration: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            max_messages,
            window_duration,
        }
    }

    /// Check whether this connection may send another message and, if so,
    /// record it. The window is purged of stale timestamps before the new
    /// message is evaluated.
    pub async fn allow_message(&self, connection_id: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.write().await;

        let window = windows
            .entry(connection_id.to_string())
            .or_insert_with(Vec::new);
        window.retain(|&t| now.duration_since(t) < self.window_duration);

        if window.len() < self.max_messages as usize {
            window.push(now);
            true
        } else {
            false
        }
    }

    /// Current message count inside the window for a connection
    pub async fn message_count(&self, connection_id: &str) -> usize {
        let windows = self.windows.read().await;
        match windows.get(connection_id) {
            Some(window) => {
                let now = Instant::now();
                window
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.window_duration)
                    .count()
            }
            None => 0,
        }
    }

    /// Drop the window for a destroyed connection
    pub async fn remove_connection(&self, connection_id: &str) {
        self.windows.write().await.remove(connection_id);
    }

    /// Clean up windows that have gone fully stale to prevent memory leaks
    pub async fn cleanup_old_entries(&self) {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        windows.retain(|_, window| {
            window.retain(|&t| now.duration_since(t) < self.window_duration);
            !window.is_empty()
        });
    }

    pub async fn tracked_connections(&self) -> usize {
        self.windows.read().await.len()
    }
}
