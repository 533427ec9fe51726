use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gpio::debounce::DebounceEngine;
use crate::gpio::tick::TickClock;
use crate::heartbeat::{alive_payload, Heartbeat};
use crate::mqtt::bridge::MqttBridge;

/// Reference poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// External timeout applied to the acknowledged heartbeat publish.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-threaded cooperative driver tying the components together.
///
/// Per tick, in order: reconnect gate, debounce evaluation and publish,
/// heartbeat. The reconnect gate runs first so a stable change published in
/// the same tick as a successful reconnect is not lost.
pub struct PollLoop {
    bridge: MqttBridge,
    engine: DebounceEngine,
    heartbeat: Heartbeat,
    clock: Arc<TickClock>,
    cadence: Duration,
}

impl PollLoop {
    pub fn new(
        bridge: MqttBridge,
        engine: DebounceEngine,
        heartbeat: Heartbeat,
        clock: Arc<TickClock>,
    ) -> Self {
        Self {
            bridge,
            engine,
            heartbeat,
            clock,
            cadence: POLL_INTERVAL,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("poll loop started at {:?} cadence", self.cadence);
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick();
        }
        info!("poll loop stopped");
    }

    fn tick(&mut self) {
        let now = Instant::now();
        debug!("poll tick, link {:?}", self.bridge.state());

        self.bridge.maybe_reconnect(now);

        for change in self.engine.poll(self.clock.now()) {
            let payload = if change.level { "ON" } else { "OFF" };
            debug!("MQTT sending gpio {} {}", change.pin, payload);
            let topic = format!("gpio/{}", change.pin);
            if let Err(e) = self.bridge.publish(&topic, payload, false) {
                warn!("failed to publish {}: {}", topic, e);
            }
        }

        if self.heartbeat.due(now) {
            debug!("emitting heartbeat");
            // the ack wait runs off the tick so a slow or absent broker
            // cannot stall the cadence; acknowledged mode has no internal
            // timeout, bound it here
            let bridge = self.bridge.clone();
            tokio::spawn(async move {
                let acked = bridge.publish_acked("alive", alive_payload(), true);
                match tokio::time::timeout(HEARTBEAT_TIMEOUT, acked).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("failed to publish heartbeat: {}", e),
                    Err(_) => warn!("heartbeat not acknowledged within {:?}", HEARTBEAT_TIMEOUT),
                }
            });
        }
    }
}
