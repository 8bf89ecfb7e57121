//! Fixed pool of hardware PWM generators.
//!
//! Each slot maps to one LEDC timer/channel pair.  A slot is taken when a
//! channel switches to PWM and given back when it leaves PWM.  Running out
//! of slots is not an error for the caller: the channel set falls back to
//! plain digital output.

use crate::pins::PWM_GENERATORS;

/// Handle to one allocated generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmSlot(u8);

impl PwmSlot {
    pub fn index(self) -> u8 {
        self.0
    }
}

/// Bitmask allocator over [`PWM_GENERATORS`] slots.
#[derive(Debug, Clone)]
pub struct PwmPool {
    in_use: u8,
    capacity: u8,
}

impl Default for PwmPool {
    fn default() -> Self {
        Self::new(PWM_GENERATORS)
    }
}

impl PwmPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            in_use: 0,
            capacity: capacity.min(8) as u8,
        }
    }

    /// Take the lowest free slot.
    pub fn allocate(&mut self) -> Option<PwmSlot> {
        let free = (0..self.capacity).find(|i| self.in_use & (1 << i) == 0)?;
        self.in_use |= 1 << free;
        Some(PwmSlot(free))
    }

    pub fn release(&mut self, slot: PwmSlot) {
        self.in_use &= !(1 << slot.0);
    }

    pub fn available(&self) -> usize {
        self.capacity as usize - self.in_use.count_ones() as usize
    }
}
