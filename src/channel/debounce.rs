//! Time-based debounce filter.
//!
//! Every raw sample that differs from the previous raw sample restarts the
//! stability clock.  The stable value only follows the raw value once the
//! raw value has been constant for the whole window, so a line chattering
//! faster than the window never produces a transition.

/// Per-channel debounce state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    window_ms: u32,
    raw: bool,
    raw_since_ms: u64,
    stable: bool,
}

impl Debouncer {
    /// Start with `initial` as both raw and stable level, so the first
    /// sample after boot does not report a phantom edge.
    pub fn new(window_ms: u32, initial: bool, now_ms: u64) -> Self {
        Self {
            window_ms,
            raw: initial,
            raw_since_ms: now_ms,
            stable: initial,
        }
    }

    /// Feed one raw sample.  Returns `Some(level)` exactly once per
    /// accepted stable transition.
    pub fn update(&mut self, raw: bool, now_ms: u64) -> Option<bool> {
        if raw != self.raw {
            self.raw = raw;
            self.raw_since_ms = now_ms;
        }

        let held_ms = now_ms.saturating_sub(self.raw_since_ms);
        if self.raw != self.stable && held_ms >= u64::from(self.window_ms) {
            self.stable = self.raw;
            return Some(self.stable);
        }
        None
    }

    pub fn stable(&self) -> bool {
        self.stable
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }
}
