//! Counter storage for fixed windows.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tokio::time::Instant;

/// Backend failures
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Counter state right after a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Hits in the current window, including this one
    pub count: u32,
    /// Time until the window closes
    pub reset_in: Duration,
}

/// Storage for per-key fixed-window counters.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Count one hit against `key`, opening a window of `window` if none is live.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, BackendError>;

    /// Drop expired windows. Returns how many were removed.
    async fn sweep(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Process-local counters.
///
/// Uses the tokio clock so tests can drive windows with a paused runtime.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    windows: RwLock<HashMap<String, Window>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys, expired or not
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl RateLimitBackend for MemoryBackend {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, BackendError> {
        let now = Instant::now();
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + window,
        });
        if now >= entry.reset_at {
            *entry = Window {
                count: 0,
                reset_at: now + window,
            };
        }
        entry.count = entry.count.saturating_add(1);

        Ok(WindowState {
            count: entry.count,
            reset_in: entry.reset_at.saturating_duration_since(now),
        })
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, window| window.reset_at > now);
        before - windows.len()
    }
}

/// Counters shared across instances through Redis.
///
/// `INCR` counts the hit; the first hit of a window sets `PEXPIRE`, and
/// `PTTL` reports how long the window has left. Redis expires keys itself,
/// so sweeping is a no-op.
#[derive(Clone)]
pub struct RedisBackend {
    connection: MultiplexedConnection,
    prefix: String,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            connection,
            prefix: "vetline:ratelimit".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl RateLimitBackend for RedisBackend {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, BackendError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let window_ms = window.as_millis() as u64;

        let (count, ttl_ms): (u32, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        // A key without expiry was just opened by this hit.
        let reset_in = if ttl_ms < 0 {
            redis::cmd("PEXPIRE")
                .arg(&key)
                .arg(window_ms)
                .query_async::<_, ()>(&mut conn)
                .await?;
            window
        } else {
            Duration::from_millis(ttl_ms as u64)
        };

        Ok(WindowState { count, reset_in })
    }

    async fn sweep(&self) -> usize {
        0
    }
}
