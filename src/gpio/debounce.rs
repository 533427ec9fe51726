use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::tick::tick_diff;

/// Ticks (µs) a level must be held before it counts as stable.
pub const DEBOUNCE_TICKS: u32 = 50_000;

const TICK_MASK: u64 = 0xFFFF_FFFF;
const LEVEL_BIT: u64 = 1 << 32;
const PENDING_BIT: u64 = 1 << 33;

/// Shared cell carrying a pin's latest raw edge from the interrupt context
/// to the poll loop.
///
/// The `(tick, level, pending)` triple is packed into a single `AtomicU64`
/// so the interrupt-side write and the poll-side read-and-clear can never
/// tear into a new tick combined with a stale level. The interrupt side is
/// one plain store and never blocks.
#[derive(Debug, Default)]
pub struct EdgeCell(AtomicU64);

impl EdgeCell {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Records a raw edge. Called from the interrupt context; last edge wins.
    pub fn record_edge(&self, level: bool, tick: u32) {
        let mut word = PENDING_BIT | u64::from(tick);
        if level {
            word |= LEVEL_BIT;
        }
        self.0.store(word, Ordering::Release);
    }

    /// Poll side: if an update is pending and has been stable for
    /// `threshold` ticks, clears the pending flag and returns the level.
    ///
    /// The clear is a compare-exchange against the word that was read, so an
    /// edge racing in between load and clear keeps its own pending flag and
    /// restarts the window instead of being swallowed.
    fn try_take_stable(&self, now: u32, threshold: u32) -> Option<bool> {
        let word = self.0.load(Ordering::Acquire);
        if word & PENDING_BIT == 0 {
            return None;
        }
        let tick = (word & TICK_MASK) as u32;
        if tick_diff(now, tick) < threshold {
            return None;
        }
        match self
            .0
            .compare_exchange(word, word & !PENDING_BIT, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(word & LEVEL_BIT != 0),
            // a newer edge superseded this one, evaluate it next tick
            Err(_) => None,
        }
    }
}

/// A level change that survived the debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableChange {
    pub pin: u8,
    pub level: bool,
}

/// Poll-side record for one monitored pin.
#[derive(Debug)]
struct MonitoredPin {
    id: u8,
    cell: Arc<EdgeCell>,
    last_stable: Option<bool>,
}

/// Per-pin debounce state machine.
///
/// Raw edges land in each pin's [`EdgeCell`]; [`DebounceEngine::poll`] run on
/// the poll cadence turns them into at most one [`StableChange`] per
/// stabilization. Edges faster than [`DEBOUNCE_TICKS`] collapse into a single
/// event reflecting the final level, and a pin that never settles emits
/// nothing at all.
#[derive(Debug)]
pub struct DebounceEngine {
    pins: Vec<MonitoredPin>,
    threshold: u32,
}

impl DebounceEngine {
    pub fn new(pin_ids: &[u8]) -> Self {
        Self::with_threshold(pin_ids, DEBOUNCE_TICKS)
    }

    pub fn with_threshold(pin_ids: &[u8], threshold: u32) -> Self {
        let pins = pin_ids
            .iter()
            .map(|&id| MonitoredPin {
                id,
                cell: Arc::new(EdgeCell::new()),
                last_stable: None,
            })
            .collect();
        Self { pins, threshold }
    }

    /// Cells for hardware interrupt registration, one per monitored pin.
    pub fn cells(&self) -> impl Iterator<Item = (u8, Arc<EdgeCell>)> + '_ {
        self.pins.iter().map(|p| (p.id, Arc::clone(&p.cell)))
    }

    /// Evaluates every pin against the debounce window and drains the ones
    /// that stabilized.
    pub fn poll(&mut self, now: u32) -> Vec<StableChange> {
        let mut changes = Vec::new();
        for pin in &mut self.pins {
            if let Some(level) = pin.cell.try_take_stable(now, self.threshold) {
                debug!("gpio {} stable at level {}", pin.id, level);
                pin.last_stable = Some(level);
                changes.push(StableChange { pin: pin.id, level });
            }
        }
        changes
    }

    /// Last level that survived a full debounce window, if any.
    pub fn last_stable(&self, pin: u8) -> Option<bool> {
        self.pins
            .iter()
            .find(|p| p.id == pin)
            .and_then(|p| p.last_stable)
    }
}
