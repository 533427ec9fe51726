use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::gpio::hardware::GpioSink;

use super::bridge::{full_topic, InboundCommand};

/// Resolves a command payload against the fixed, case-sensitive vocabulary.
/// Anything outside it is rejected with `None`.
pub fn parse_level(payload: &str) -> Option<bool> {
    match payload {
        "on" | "ON" | "1" => Some(true),
        "off" | "OFF" | "0" => Some(false),
        _ => None,
    }
}

/// Per-pin command topic `<device_id>/cmd/gpio/<pin>`.
pub fn command_topic(device_id: &str, pin: u8) -> String {
    full_topic(device_id, &format!("cmd/gpio/{}", pin))
}

/// Routes inbound command payloads to GPIO writes.
///
/// Topics are resolved through a dispatch table built once at startup, each
/// entry bound to its pin id by value. Unrecognized payloads are silently
/// ignored by policy: no write, no error, a debug line only. Writes are
/// immediate and never debounced.
pub struct CommandRouter<S: GpioSink> {
    generic_topic: String,
    routes: HashMap<String, u8>,
    sink: S,
}

impl<S: GpioSink> CommandRouter<S> {
    pub fn new(device_id: &str, settable: &[u8], sink: S) -> Self {
        let routes = settable
            .iter()
            .map(|&pin| (command_topic(device_id, pin), pin))
            .collect();
        Self {
            generic_topic: full_topic(device_id, "cmd"),
            routes,
            sink,
        }
    }

    /// All topics the bridge must subscribe to: the generic command topic
    /// plus one per settable pin.
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![self.generic_topic.clone()];
        topics.extend(self.routes.keys().cloned());
        topics
    }

    /// Handles one inbound message. Runs directly off the transport channel,
    /// independent of the poll cadence.
    pub fn dispatch(&self, topic: &str, payload: &str) {
        if topic == self.generic_topic {
            debug!("MQTT message={}", payload);
            return;
        }
        let Some(&pin) = self.routes.get(topic) else {
            debug!("ignoring message on unrouted topic {}", topic);
            return;
        };
        let Some(level) = parse_level(payload) else {
            debug!("gpio {} received unrecognized payload {:?}", pin, payload);
            return;
        };
        info!("gpio {} set to {}", pin, if level { "ON" } else { "OFF" });
        if let Err(e) = self.sink.write(pin, level) {
            error!("failed to write gpio {}: {}", pin, e);
        }
    }

    /// Consumes inbound commands until the bridge side closes the channel.
    pub async fn run(self, mut inbound_rx: mpsc::Receiver<InboundCommand>) {
        while let Some(command) = inbound_rx.recv().await {
            self.dispatch(&command.topic, &command.payload);
        }
        debug!("command channel closed, router stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::hardware::GpioError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(u8, bool)>>,
    }

    impl GpioSink for RecordingSink {
        fn write(&self, pin: u8, level: bool) -> Result<(), GpioError> {
            self.writes.lock().unwrap().push((pin, level));
            Ok(())
        }
    }

    fn writes(router: &CommandRouter<RecordingSink>) -> Vec<(u8, bool)> {
        router.sink.writes.lock().unwrap().clone()
    }

    #[test]
    fn vocabulary_resolves_levels() {
        for payload in ["on", "ON", "1"] {
            assert_eq!(parse_level(payload), Some(true), "payload {:?}", payload);
        }
        for payload in ["off", "OFF", "0"] {
            assert_eq!(parse_level(payload), Some(false), "payload {:?}", payload);
        }
    }

    #[test]
    fn vocabulary_is_case_sensitive() {
        assert_eq!(parse_level("On"), None);
        assert_eq!(parse_level("Off"), None);
        assert_eq!(parse_level("oN"), None);
    }

    #[test]
    fn matched_payload_writes_once() {
        let router = CommandRouter::new("gpiomon", &[27], RecordingSink::default());
        router.dispatch("gpiomon/cmd/gpio/27", "1");
        assert_eq!(writes(&router), vec![(27, true)]);
    }

    #[test]
    fn unknown_payload_is_ignored() {
        let router = CommandRouter::new("gpiomon", &[27], RecordingSink::default());
        router.dispatch("gpiomon/cmd/gpio/27", "1");
        router.dispatch("gpiomon/cmd/gpio/27", "banana");
        assert_eq!(writes(&router), vec![(27, true)]);
    }

    #[test]
    fn dispatch_table_binds_each_pin() {
        let router = CommandRouter::new("gpiomon", &[17, 27], RecordingSink::default());
        router.dispatch("gpiomon/cmd/gpio/17", "off");
        router.dispatch("gpiomon/cmd/gpio/27", "on");
        let mut seen = writes(&router);
        seen.sort_unstable();
        assert_eq!(seen, vec![(17, false), (27, true)]);
    }

    #[test]
    fn generic_topic_never_writes() {
        let router = CommandRouter::new("gpiomon", &[27], RecordingSink::default());
        router.dispatch("gpiomon/cmd", "on");
        assert!(writes(&router).is_empty());
    }

    #[test]
    fn unrouted_topic_never_writes() {
        let router = CommandRouter::new("gpiomon", &[27], RecordingSink::default());
        router.dispatch("gpiomon/cmd/gpio/5", "on");
        router.dispatch("other/cmd/gpio/27", "on");
        assert!(writes(&router).is_empty());
    }

    #[test]
    fn subscription_list_covers_generic_and_pins() {
        let router = CommandRouter::new("gpiomon", &[17, 27], RecordingSink::default());
        let mut topics = router.topics();
        topics.sort();
        assert_eq!(
            topics,
            vec![
                "gpiomon/cmd".to_string(),
                "gpiomon/cmd/gpio/17".to_string(),
                "gpiomon/cmd/gpio/27".to_string(),
            ]
        );
    }
}
