//! GPIO capabilities and per-board channel wiring.
//!
//! Single source of truth for which ESP32 lines can do what.  Every
//! channel looks its line up here rather than hard-coding pin rules, and
//! every board profile is a table of [`BoardChannel`] rows.
//!
//! ## ESP32 line rules
//!
//! - GPIO 34–39 are input-only and have no internal pull resistors.
//! - GPIO 6–11 are wired to the SPI flash and must never be used.
//! - GPIO 0, 2, 5, 12 and 15 are boot straps.  Their level while the chip
//!   comes out of reset selects boot mode, flash voltage or log output, so
//!   firmware must never drive them to the unsafe level.

use embedded_hal::digital::PinState;
use serde::{Deserialize, Serialize};

use crate::channel::{Pull, Role, RoleSet};

/// Number of GPIO numbers on the ESP32 (0–39).
pub const GPIO_COUNT: i32 = 40;

// ---------------------------------------------------------------------------
// Line capabilities
// ---------------------------------------------------------------------------

/// What the silicon allows on one GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCaps {
    /// Line has an output driver.
    pub output: bool,
    /// Line has internal pull-up / pull-down resistors.
    pub internal_pull: bool,
    /// Boot-strap line: the level that must be held during reset and
    /// every role transition.  `None` for ordinary lines.
    pub strap_safe: Option<PinState>,
}

impl LineCaps {
    /// A line that cannot be used at all.
    pub const UNUSABLE: Self = Self {
        output: false,
        internal_pull: false,
        strap_safe: None,
    };

    /// Whether the line can electrically take `role`.
    ///
    /// PWM idles low, so it is refused on straps that must stay high.
    pub fn supports(&self, role: Role) -> bool {
        match role {
            Role::DigitalIn => true,
            Role::DigitalOut => self.output,
            Role::Pwm => self.output && self.strap_safe != Some(PinState::High),
        }
    }
}

/// Look up the capabilities of `gpio`.  Returns `None` for lines that do
/// not exist or are reserved for the flash.
pub const fn line_caps(gpio: i32) -> Option<LineCaps> {
    match gpio {
        // Boot mode select: low enters the ROM download mode.
        0 => Some(strap(PinState::High)),
        // Must be low (or floating) to enter download mode from GPIO0.
        2 => Some(strap(PinState::Low)),
        // SDIO slave timing.
        5 => Some(strap(PinState::High)),
        // MTDI: high selects 1.8 V flash and bricks 3.3 V modules.
        12 => Some(strap(PinState::Low)),
        // MTDO: low silences the ROM boot log.
        15 => Some(strap(PinState::High)),
        6..=11 => None,
        1 | 3 | 4 | 13 | 14 | 16..=19 | 21..=23 | 25..=27 | 32 | 33 => Some(LineCaps {
            output: true,
            internal_pull: true,
            strap_safe: None,
        }),
        34..=39 => Some(LineCaps {
            output: false,
            internal_pull: false,
            strap_safe: None,
        }),
        _ => None,
    }
}

const fn strap(safe: PinState) -> LineCaps {
    LineCaps {
        output: true,
        internal_pull: true,
        strap_safe: Some(safe),
    }
}

// ---------------------------------------------------------------------------
// Board profiles
// ---------------------------------------------------------------------------

/// Hardware variants of the controller family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardProfile {
    /// Two relays, one opto-isolated input.
    Relay2,
    /// Four relays, two opto-isolated inputs.
    Relay4,
    /// Four trigger inputs, four outputs (two PWM-capable, one on GPIO0).
    Trigger8,
}

/// One row of a board wiring table.
#[derive(Debug, Clone, Copy)]
pub struct BoardChannel {
    pub gpio: u8,
    /// Roles the board wiring allows for this channel.
    pub allowed: RoleSet,
    /// Role at first boot.
    pub role: Role,
    /// Relay driver or opto-coupler pulls the line low when active.
    pub active_low: bool,
    pub pull: Pull,
}

const IN: RoleSet = RoleSet::INPUT;
const OUT: RoleSet = RoleSet::OUTPUT;
const IN_OUT: RoleSet = RoleSet::INPUT.with(Role::DigitalOut);
const OUT_PWM: RoleSet = RoleSet::OUTPUT.with(Role::Pwm);

const fn row(gpio: u8, allowed: RoleSet, role: Role, active_low: bool, pull: Pull) -> BoardChannel {
    BoardChannel {
        gpio,
        allowed,
        role,
        active_low,
        pull,
    }
}

pub const RELAY2: [BoardChannel; 3] = [
    row(32, IN_OUT, Role::DigitalIn, true, Pull::Up),
    row(26, OUT, Role::DigitalOut, false, Pull::None),
    row(27, OUT, Role::DigitalOut, false, Pull::None),
];

pub const RELAY4: [BoardChannel; 6] = [
    row(32, IN_OUT, Role::DigitalIn, true, Pull::Up),
    row(33, IN_OUT, Role::DigitalIn, true, Pull::Up),
    row(16, OUT, Role::DigitalOut, false, Pull::None),
    row(17, OUT, Role::DigitalOut, false, Pull::None),
    row(18, OUT_PWM, Role::DigitalOut, false, Pull::None),
    row(19, OUT_PWM, Role::DigitalOut, false, Pull::None),
];

/// Channel 8 sits on GPIO0 behind an active-low relay driver so that the
/// idle (released) level is the strap-safe high.
pub const TRIGGER8: [BoardChannel; 8] = [
    row(32, IN_OUT, Role::DigitalIn, false, Pull::Down),
    row(33, IN_OUT, Role::DigitalIn, false, Pull::Down),
    row(34, IN, Role::DigitalIn, false, Pull::None),
    row(35, IN, Role::DigitalIn, false, Pull::None),
    row(25, OUT, Role::DigitalOut, false, Pull::None),
    row(26, OUT_PWM, Role::DigitalOut, false, Pull::None),
    row(27, OUT_PWM, Role::DigitalOut, false, Pull::None),
    row(0, OUT, Role::DigitalOut, true, Pull::None),
];

impl BoardProfile {
    /// Wiring table for this board.
    pub fn wiring(self) -> &'static [BoardChannel] {
        match self {
            Self::Relay2 => &RELAY2,
            Self::Relay4 => &RELAY4,
            Self::Trigger8 => &TRIGGER8,
        }
    }
}

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// Hardware PWM generators available to channels (one LEDC timer each).
pub const PWM_GENERATORS: usize = 4;
/// LEDC timer resolution (bits).  8-bit gives 0 – 255 duty levels.
pub const PWM_RESOLUTION_BITS: u32 = 8;
/// Default PWM frequency for dimmers and fans (5 kHz).
pub const PWM_DEFAULT_FREQ_HZ: u32 = 5_000;
/// Highest frequency the LEDC can produce at 8-bit resolution.
pub const PWM_MAX_FREQ_HZ: u32 = 40_000;
