//! # GPIO Edge Monitoring
//!
//! Turns noisy hardware edge interrupts into reliable level-change events
//! and exposes settable output pins to the command router.
//!
//! ```text
//! gpio/
//! ├── tick.rs     - wrapping 32-bit microsecond tick clock
//! ├── debounce.rs - per-pin debounce state machine (EdgeCell, DebounceEngine)
//! └── hardware.rs - rppal pin ownership, interrupt registration, GpioSink
//! ```
//!
//! The split mirrors the two execution contexts involved: `hardware.rs` owns
//! the interrupt side (callbacks that do nothing but stamp an atomic cell),
//! while `debounce.rs` owns the poll side that reads those cells on a fixed
//! cadence and decides which levels actually stabilized. `tick.rs` gives both
//! sides a common wrapping time base so debounce arithmetic stays correct
//! across counter wrap.

pub mod debounce;
pub mod hardware;
pub mod tick;
