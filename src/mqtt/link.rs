use std::time::{Duration, Instant};

/// Cap on the backoff exponent. Retry count is unbounded, only the computed
/// delay saturates (2^12 seconds).
pub const MAX_BACKOFF_EXP: u32 = 12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BridgeState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// Connection lifecycle state machine for the MQTT bridge.
///
/// Transport callbacks drive it through [`LinkState::on_connected`] and
/// [`LinkState::on_error`]; the poll loop observes `Backoff` and issues
/// reconnects once the computed delay has elapsed. Pure state, no I/O, so
/// the transition table is testable without a broker.
#[derive(Debug)]
pub struct LinkState {
    state: BridgeState,
    reconnect_attempts: u32,
    backoff: Duration,
    entered_backoff: Option<Instant>,
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            state: BridgeState::Disconnected,
            reconnect_attempts: 0,
            backoff: Duration::ZERO,
            entered_backoff: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Startup or reconnect request was handed to the transport.
    pub fn on_connect_started(&mut self) {
        self.state = BridgeState::Connecting;
    }

    /// Broker acknowledged the connection.
    pub fn on_connected(&mut self) {
        self.state = BridgeState::Connected;
        self.reconnect_attempts = 0;
        self.backoff = Duration::ZERO;
        self.entered_backoff = None;
    }

    /// Transport error. From `Connected` this is an unsolicited disconnect
    /// and restarts the exponential policy at one attempt; from `Connecting`
    /// it is a failed attempt and escalates the backoff.
    pub fn on_error(&mut self, now: Instant) {
        self.reconnect_attempts = match self.state {
            BridgeState::Connected => 1,
            _ => (self.reconnect_attempts + 1).min(MAX_BACKOFF_EXP),
        };
        self.backoff = Duration::from_secs(1 << self.reconnect_attempts);
        self.state = BridgeState::Backoff;
        self.entered_backoff = Some(now);
    }

    /// Whether the poll loop should issue a reconnect this tick. True only
    /// in `Backoff` once the computed delay has elapsed.
    pub fn reconnect_due(&self, now: Instant) -> bool {
        match (self.state, self.entered_backoff) {
            (BridgeState::Backoff, Some(entered)) => {
                now.saturating_duration_since(entered) >= self.backoff
            }
            _ => false,
        }
    }

    /// Poll loop issued the reconnect request.
    pub fn on_reconnect_issued(&mut self) {
        self.state = BridgeState::Connecting;
        self.entered_backoff = None;
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_connect_resets_attempts() {
        let now = Instant::now();
        let mut link = LinkState::new();
        link.on_connect_started();
        link.on_error(now);
        link.on_error(now);
        assert_eq!(link.reconnect_attempts(), 2);

        link.on_reconnect_issued();
        link.on_connected();
        assert_eq!(link.state(), BridgeState::Connected);
        assert_eq!(link.reconnect_attempts(), 0);
        assert_eq!(link.backoff(), Duration::ZERO);
    }

    #[test]
    fn failures_escalate_exponentially() {
        let now = Instant::now();
        let mut link = LinkState::new();
        link.on_connect_started();

        let mut previous = 0;
        for attempt in 1..=5 {
            link.on_error(now);
            assert_eq!(link.state(), BridgeState::Backoff);
            assert_eq!(link.reconnect_attempts(), attempt);
            assert!(link.reconnect_attempts() >= previous);
            assert_eq!(link.backoff(), Duration::from_secs(1 << attempt));
            previous = link.reconnect_attempts();
            link.on_reconnect_issued();
        }
    }

    #[test]
    fn backoff_exponent_saturates_at_cap() {
        let now = Instant::now();
        let mut link = LinkState::new();
        link.on_connect_started();
        for _ in 0..40 {
            link.on_error(now);
            link.on_reconnect_issued();
        }
        assert_eq!(link.reconnect_attempts(), MAX_BACKOFF_EXP);
        assert_eq!(link.backoff(), Duration::from_secs(1 << MAX_BACKOFF_EXP));
    }

    #[test]
    fn disconnect_after_failures_restarts_policy() {
        // three failed attempts, a success, then an unsolicited disconnect
        // followed by three more failures: attempts reach 4, delay 2^4
        let now = Instant::now();
        let mut link = LinkState::new();
        link.on_connect_started();
        for _ in 0..3 {
            link.on_error(now);
            link.on_reconnect_issued();
        }
        link.on_connected();

        link.on_error(now);
        assert_eq!(link.reconnect_attempts(), 1);
        for _ in 0..3 {
            link.on_reconnect_issued();
            link.on_error(now);
        }
        assert_eq!(link.reconnect_attempts(), 4);
        assert_eq!(link.backoff(), Duration::from_secs(16));
    }

    #[test]
    fn reconnect_gated_behind_backoff_delay() {
        let now = Instant::now();
        let mut link = LinkState::new();
        link.on_connect_started();
        link.on_error(now);

        assert_eq!(link.backoff(), Duration::from_secs(2));
        assert!(!link.reconnect_due(now));
        assert!(!link.reconnect_due(now + Duration::from_secs(1)));
        assert!(link.reconnect_due(now + Duration::from_secs(2)));

        link.on_reconnect_issued();
        assert_eq!(link.state(), BridgeState::Connecting);
        assert!(!link.reconnect_due(now + Duration::from_secs(10)));
    }

    #[test]
    fn no_reconnect_while_connected() {
        let mut link = LinkState::new();
        link.on_connect_started();
        link.on_connected();
        assert!(!link.reconnect_due(Instant::now() + Duration::from_secs(3600)));
    }
}
