use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;

use super::link::{BridgeState, LinkState};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("packet id assignment lost, event loop stopped")]
    AssignmentLost,
}

/// Raw inbound MQTT message handed to the command router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub topic: String,
    pub payload: String,
}

/// MQTT bridge owning the connect/reconnect/backoff lifecycle.
///
/// The rumqttc event loop runs in its own task and reports connection
/// transitions into the shared [`LinkState`]; the poll loop reads that state
/// and decides when a reconnect is issued. Publishes prefix the device
/// identity and default to fire-and-forget, with [`MqttBridge::publish_acked`]
/// as the synchronous variant that waits for the broker acknowledgment.
#[derive(Clone)]
pub struct MqttBridge {
    client: AsyncClient,
    device_id: String,
    qos: QoS,
    link: Arc<Mutex<LinkState>>,
    reconnect: Arc<Notify>,
    acks: Arc<AckLedger>,
}

impl MqttBridge {
    /// Creates the client and spawns the event-loop task. `topics` are
    /// subscribed on every successful (re)connect.
    pub fn start(
        cfg: &Config,
        topics: Vec<String>,
        inbound_tx: mpsc::Sender<InboundCommand>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        info!("creating MQTT client for {}:{}", cfg.host, cfg.port);
        let mut options = MqttOptions::new(&cfg.id, &cfg.host, cfg.port);
        options
            .set_credentials(&cfg.username, &cfg.password)
            .set_keep_alive(Duration::from_secs(5));

        let (client, event_loop) = AsyncClient::new(options, 100);

        let mut link = LinkState::new();
        link.on_connect_started();

        let bridge = Self {
            client,
            device_id: cfg.id.clone(),
            qos: qos_from(cfg.qos),
            link: Arc::new(Mutex::new(link)),
            reconnect: Arc::new(Notify::new()),
            acks: Arc::new(AckLedger::new()),
        };

        let task = tokio::spawn(run_event_loop(
            event_loop,
            bridge.clone(),
            topics,
            inbound_tx,
            cancel,
        ));
        (bridge, task)
    }

    pub fn state(&self) -> BridgeState {
        self.lock_link().state()
    }

    /// Issues a reconnect request if the bridge is in backoff and the
    /// computed delay has elapsed. Called by the poll loop every tick.
    pub fn maybe_reconnect(&self, now: Instant) {
        let mut link = self.lock_link();
        if link.reconnect_due(now) {
            warn!(
                "MQTT reconnecting (attempt {}, waited {:?})",
                link.reconnect_attempts(),
                link.backoff()
            );
            link.on_reconnect_issued();
            self.reconnect.notify_one();
        }
    }

    /// Fire-and-forget publish of `<device_id>/<suffix>`.
    ///
    /// Non-blocking: requests are queued for the event loop. During a long
    /// outage the queue can fill up, in which case the publish is dropped
    /// with an error instead of stalling the poll loop. A stalled poll loop
    /// could never issue the reconnect that would drain the queue again.
    pub fn publish(
        &self,
        suffix: &str,
        payload: impl Into<Vec<u8>>,
        retain: bool,
    ) -> Result<(), BridgeError> {
        self.submit(suffix, payload, retain, None)
    }

    /// Publishes and blocks until the assigned packet id shows up in the
    /// acknowledgment set. Returns the packet id. There is no internal
    /// timeout; callers that need one wrap this in `tokio::time::timeout`.
    /// At QoS 0 the broker never acknowledges, so this returns immediately.
    pub async fn publish_acked(
        &self,
        suffix: &str,
        payload: impl Into<Vec<u8>>,
        retain: bool,
    ) -> Result<u16, BridgeError> {
        if self.qos == QoS::AtMostOnce {
            self.publish(suffix, payload, retain)?;
            return Ok(0);
        }
        let (tx, rx) = oneshot::channel();
        self.submit(suffix, payload, retain, Some(tx))?;
        let pkid = rx.await.map_err(|_| BridgeError::AssignmentLost)?;
        self.acks.acknowledged(pkid).await;
        Ok(pkid)
    }

    fn submit(
        &self,
        suffix: &str,
        payload: impl Into<Vec<u8>>,
        retain: bool,
        sender: Option<oneshot::Sender<u16>>,
    ) -> Result<(), BridgeError> {
        let topic = full_topic(&self.device_id, suffix);
        debug!("publishing topic={}", topic);
        self.acks
            .submit(sender, || self.client.try_publish(topic, self.qos, retain, payload))?;
        Ok(())
    }

    /// Requests a clean disconnect. The event-loop task exits once the
    /// request has gone out; non-blocking for the same reason as
    /// [`MqttBridge::publish`].
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request failed: {}", e);
        }
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builds `<device_id>/<suffix>`.
pub fn full_topic(device_id: &str, suffix: &str) -> String {
    format!("{}/{}", device_id, suffix)
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Drives the rumqttc event loop, reporting transitions into the shared
/// link state and forwarding inbound publishes to the command router.
async fn run_event_loop(
    mut event_loop: EventLoop,
    bridge: MqttBridge,
    topics: Vec<String>,
    inbound_tx: mpsc::Sender<InboundCommand>,
    cancel: CancellationToken,
) {
    info!("MQTT event loop started");
    loop {
        // cancellation is only honored while parked in backoff; an active
        // connection shuts down through the outgoing disconnect packet so
        // the broker sees a clean close
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                on_connack(&bridge, &topics, ack);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let command = InboundCommand {
                    topic: publish.topic,
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                };
                if inbound_tx.send(command).await.is_err() {
                    error!("command channel closed, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => bridge.acks.complete(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => bridge.acks.complete(comp.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => bridge.acks.assign(pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                bridge.lock_link().on_error(Instant::now());
                warn!("MQTT transport error: {}, entering backoff", e);
                // park until the poll loop issues the next reconnect
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = bridge.reconnect.notified() => {}
                }
            }
        }
    }
    info!("MQTT event loop stopped");
}

fn on_connack(bridge: &MqttBridge, topics: &[String], ack: ConnAck) {
    if ack.code != ConnectReturnCode::Success {
        error!("MQTT connection refused: {:?}", ack.code);
        bridge.lock_link().on_error(Instant::now());
        return;
    }
    info!("connected to MQTT broker");
    bridge.lock_link().on_connected();
    // subscriptions do not survive a broker restart, reissue them every time
    for topic in topics {
        debug!("subscribing to MQTT channel {}", topic);
        if let Err(e) = bridge.client.try_subscribe(topic, bridge.qos) {
            warn!("failed to subscribe {}: {}", topic, e);
        }
    }
}

/// Tracks packet id assignments and broker acknowledgments for the
/// synchronous publish mode.
///
/// Every accepted publish pushes one queue slot, a vacant one for
/// fire-and-forget publishes, and each outgoing publish event pops exactly
/// one slot. Queueing the request and its slot happens under the same lock,
/// so the queue stays aligned with the outgoing event order even when
/// publishes come from different tasks.
struct AckLedger {
    inner: Mutex<AckInner>,
    notify: Notify,
}

struct AckInner {
    assignments: VecDeque<Option<oneshot::Sender<u16>>>,
    acked: HashSet<u16>,
}

impl AckLedger {
    fn new() -> Self {
        Self {
            inner: Mutex::new(AckInner {
                assignments: VecDeque::new(),
                acked: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Hands the request to the client and records its assignment slot in
    /// one step. A rejected request leaves no slot behind.
    fn submit<F, E>(&self, sender: Option<oneshot::Sender<u16>>, publish: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let mut inner = self.lock();
        publish()?;
        inner.assignments.push_back(sender);
        Ok(())
    }

    /// Event-loop side: an outgoing publish got this packet id.
    fn assign(&self, pkid: u16) {
        if let Some(Some(waiter)) = self.lock().assignments.pop_front() {
            let _ = waiter.send(pkid);
        }
    }

    /// Event-loop side: the broker acknowledged this packet id.
    fn complete(&self, pkid: u16) {
        self.lock().acked.insert(pkid);
        self.notify.notify_waiters();
    }

    /// Waits until `pkid` has been acknowledged, consuming the entry.
    async fn acknowledged(&self, pkid: u16) {
        loop {
            let notified = self.notify.notified();
            if self.lock().acked.remove(&pkid) {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AckInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_carry_device_identity() {
        assert_eq!(full_topic("gpiomon", "gpio/17"), "gpiomon/gpio/17");
        assert_eq!(full_topic("cellar", "alive"), "cellar/alive");
    }

    #[test]
    fn qos_levels_map_to_rumqttc() {
        assert_eq!(qos_from(0), QoS::AtMostOnce);
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn ledger_binds_assignments_in_order() {
        let ledger = AckLedger::new();
        let (first_tx, first) = oneshot::channel();
        let (second_tx, second) = oneshot::channel();
        ledger.submit(Some(first_tx), || Ok::<_, ()>(())).unwrap();
        ledger.submit(Some(second_tx), || Ok::<_, ()>(())).unwrap();

        ledger.assign(7);
        ledger.assign(8);

        assert_eq!(first.await.unwrap(), 7);
        assert_eq!(second.await.unwrap(), 8);
    }

    #[tokio::test]
    async fn fire_and_forget_slots_keep_waiters_aligned() {
        let ledger = AckLedger::new();
        ledger.submit(None, || Ok::<_, ()>(())).unwrap();
        let (tx, rx) = oneshot::channel();
        ledger.submit(Some(tx), || Ok::<_, ()>(())).unwrap();

        // the earlier fire-and-forget publish goes out first
        ledger.assign(41);
        ledger.assign(42);

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn rejected_publish_leaves_no_slot() {
        let ledger = AckLedger::new();
        let (lost_tx, lost) = oneshot::channel::<u16>();
        assert!(ledger.submit(Some(lost_tx), || Err(())).is_err());

        let (tx, rx) = oneshot::channel();
        ledger.submit(Some(tx), || Ok::<_, ()>(())).unwrap();
        ledger.assign(5);

        assert_eq!(rx.await.unwrap(), 5);
        assert!(lost.await.is_err());
    }

    #[tokio::test]
    async fn acknowledged_returns_for_completed_id() {
        let ledger = Arc::new(AckLedger::new());

        // ack arriving before the wait starts
        ledger.complete(3);
        ledger.acknowledged(3).await;

        // ack arriving while waiting
        let waiter = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.acknowledged(9).await })
        };
        tokio::task::yield_now().await;
        ledger.complete(9);
        waiter.await.unwrap();
    }
}
