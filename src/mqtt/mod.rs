//! # MQTT Integration Module
//!
//! Connects the bridge to the broker and keeps it connected across outages.
//!
//! ```text
//! mqtt/
//! ├── link.rs    - connection state machine (backoff policy, attempt cap)
//! ├── bridge.rs  - rumqttc client + event loop, publish/subscribe contracts
//! └── command.rs - inbound command vocabulary and per-pin dispatch table
//! ```
//!
//! The state machine in `link.rs` is deliberately free of I/O: transport
//! events from the rumqttc event loop drive it, and the poll loop reads it
//! to decide when the next reconnect goes out. Connection failures are never
//! fatal; they only escalate the backoff delay, capped at 2^12 seconds,
//! while the debounce engine keeps running. Inbound command messages bypass
//! the poll cadence entirely and are written to the pins immediately.

pub mod bridge;
pub mod command;
pub mod link;
