use std::time::{Duration, Instant};

use chrono::{Local, SecondsFormat};

/// Wall-clock interval between liveness markers.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic liveness marker.
///
/// The poll loop asks [`Heartbeat::due`] once per tick; the emitter fires on
/// the first tick and then at most once per interval. Published retained so
/// late subscribers immediately see the last-known liveness.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns true when a heartbeat should be emitted this tick and marks
    /// it as emitted.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// ISO-8601 local timestamp payload for the alive topic.
pub fn alive_payload() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}
