//! Liveness heartbeat.
//!
//! After a successful sync the keeper pings an external alert URL, at most
//! once per interval. The monitor on the other end raises an alarm when the
//! pings stop. No URL configured means no pings.

use anyhow::Result;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval-gated HTTP GET pinger.
pub struct Heartbeat {
    url: Option<String>,
    interval: Duration,
    client: reqwest::Client,
    /// Time of the last successful ping; starts at construction
    last_ping: Mutex<Instant>,
}

impl Heartbeat {
    pub fn new(url: Option<String>, interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.filter(|u| !u.trim().is_empty()),
            interval,
            client,
            last_ping: Mutex::new(Instant::now()),
        })
    }

    /// Disabled heartbeat.
    pub fn disabled() -> Result<Self> {
        Self::new(None, Duration::MAX)
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Whether a ping is due at `now`.
    pub fn is_due_at(&self, now: Instant) -> bool {
        self.is_enabled() && now.saturating_duration_since(*self.last_ping.lock()) > self.interval
    }

    /// Ping if due. Failures are logged and retried on the next call.
    pub async fn beat(&self) -> bool {
        let Some(url) = &self.url else {
            return false;
        };
        if !self.is_due_at(Instant::now()) {
            return false;
        }

        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                *self.last_ping.lock() = Instant::now();
                debug!(status = %response.status(), "Heartbeat sent");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Heartbeat rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("enabled", &self.is_enabled())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
