use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use tracing::{debug, info, warn};

use super::debounce::DebounceEngine;
use super::tick::TickClock;

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("GPIO hardware access failed: {0}")]
    Hardware(#[from] rppal::gpio::Error),

    #[error("gpio {0} is not configured as settable")]
    NotSettable(u8),
}

/// Write-only target for resolved command levels.
///
/// The command router only sees this trait, so tests can swap the hardware
/// for a recording fake.
pub trait GpioSink: Send + Sync {
    fn write(&self, pin: u8, level: bool) -> Result<(), GpioError>;
}

/// Owns the input pins and their async interrupt registrations.
///
/// Each registered callback runs on rppal's interrupt thread. It does one
/// atomic store into the pin's [`EdgeCell`] and returns; every publish or
/// debounce decision is deferred to the poll loop.
pub struct EdgeMonitor {
    pins: Vec<InputPin>,
}

impl EdgeMonitor {
    /// Claims every monitored pin and registers its edge callback.
    ///
    /// Each callback is bound to its own pin's cell by value, so interrupts
    /// can never be routed to a neighbouring pin's record.
    pub fn register(
        gpio: &Gpio,
        clock: Arc<TickClock>,
        engine: &DebounceEngine,
    ) -> Result<Self, GpioError> {
        let mut pins = Vec::new();
        for (id, cell) in engine.cells() {
            debug!("registering edge callback for gpio {}", id);
            let mut pin = gpio.get(id)?.into_input();
            let clock = Arc::clone(&clock);
            pin.set_async_interrupt(Trigger::Both, None, move |event| {
                let level = matches!(event.trigger, Trigger::RisingEdge);
                cell.record_edge(level, clock.now());
            })?;
            pins.push(pin);
        }
        info!("monitoring {} gpios", pins.len());
        Ok(Self { pins })
    }

    /// Explicitly clears every interrupt registration. Called during
    /// teardown before the process exits.
    pub fn release(mut self) {
        for pin in &mut self.pins {
            if let Err(e) = pin.clear_async_interrupt() {
                warn!("failed to clear interrupt on gpio {}: {}", pin.pin(), e);
            }
        }
    }
}

/// Settable output pins, claimed once at startup with fixed membership.
pub struct OutputBank {
    pins: Mutex<HashMap<u8, OutputPin>>,
}

impl OutputBank {
    pub fn claim(gpio: &Gpio, pin_ids: &[u8]) -> Result<Self, GpioError> {
        let mut pins = HashMap::new();
        for &id in pin_ids {
            debug!("claiming gpio {} for output", id);
            pins.insert(id, gpio.get(id)?.into_output());
        }
        Ok(Self {
            pins: Mutex::new(pins),
        })
    }
}

impl GpioSink for OutputBank {
    fn write(&self, pin: u8, level: bool) -> Result<(), GpioError> {
        let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        let out = pins.get_mut(&pin).ok_or(GpioError::NotSettable(pin))?;
        out.write(if level { Level::High } else { Level::Low });
        Ok(())
    }
}
