use std::time::Instant;

/// Monotonic microsecond tick counter truncated to 32 bits.
///
/// Edge interrupts and the poll loop both stamp time through the same clock,
/// so wrap-safe differences between their ticks stay meaningful. The counter
/// wraps roughly every 71.6 minutes; all arithmetic on it must go through
/// [`tick_diff`].
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    origin: Instant,
}

impl TickClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current tick in microseconds since clock creation, wrapping at 2^32.
    pub fn now(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap-safe `later - earlier` on the 32-bit tick counter.
pub fn tick_diff(later: u32, earlier: u32) -> u32 {
    later.wrapping_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_without_wrap() {
        assert_eq!(tick_diff(1_060_000, 1_000), 1_059_000);
    }

    #[test]
    fn diff_across_wrap() {
        // an edge stamped just before the counter wraps, polled just after
        assert_eq!(tick_diff(25_000, u32::MAX - 24_999), 50_000);
    }

    #[test]
    fn zero_diff() {
        assert_eq!(tick_diff(42, 42), 0);
    }
}
