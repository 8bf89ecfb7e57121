//! Device configuration parameters
//!
//! Board wiring plus every runtime-tunable value of the channel core.
//! Persisted as one postcard blob through
//! [`ConfigPort`](crate::app::ports::ConfigPort); runtime role, duty and
//! interlock changes are written back so they survive a reboot.

use embedded_hal::digital::PinState;
use serde::{Deserialize, Serialize};

use crate::channel::{DEBOUNCE_MAX_MS, DEBOUNCE_MIN_MS, LineSettings, Pull, Role, RoleSet};
use crate::pins::{self, BoardProfile};

/// Upper bound of the device-wide interlock window (ms).
pub const INTERLOCK_MAX_MS: u32 = 5_000;
/// Default chatter guard between accepted edges on one input (ms).
pub const EDGE_COOLDOWN_DEFAULT_MS: u32 = 20;
/// Most channels any board carries.
pub const MAX_CHANNELS: usize = 8;

/// Wiring and persisted state of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// ESP32 GPIO number.
    pub gpio: u8,
    /// Roles the board allows on this channel.
    pub allowed: RoleSet,
    /// Role applied at boot.
    pub role: Role,
    pub debounce_ms: u32,
    /// Logical "active" is the low level.
    pub active_low: bool,
    pub pull: Pull,
    /// Last commanded PWM duty (0–255), restored on entering PWM.
    pub pwm_duty: u8,
    pub pwm_freq_hz: u32,
}

impl ChannelConfig {
    pub fn settings(&self) -> LineSettings {
        LineSettings {
            debounce_ms: self.debounce_ms,
            inverted: self.active_low,
            pull: self.pull,
            pwm_freq_hz: self.pwm_freq_hz,
            pwm_duty: self.pwm_duty,
        }
    }
}

/// Core device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub board: BoardProfile,
    /// Channel `i + 1` is `channels[i]`.
    pub channels: Vec<ChannelConfig>,

    // --- Interlock ---
    /// Minimum gap between the end of one pulse and the start of the next.
    pub interlock_ms: u32,
    /// Minimum gap between two accepted edges on the same input.
    pub edge_cooldown_ms: u32,

    // --- Timing ---
    /// Host loop period (milliseconds).
    pub poll_interval_ms: u32,
    /// Task watchdog timeout (seconds).
    pub watchdog_timeout_secs: u32,
}

impl DeviceConfig {
    /// Factory wiring for `board`.
    pub fn for_board(board: BoardProfile) -> Self {
        let channels = board
            .wiring()
            .iter()
            .map(|w| ChannelConfig {
                gpio: w.gpio,
                allowed: w.allowed,
                role: w.role,
                debounce_ms: 50,
                active_low: w.active_low,
                pull: w.pull,
                pwm_duty: 0,
                pwm_freq_hz: pins::PWM_DEFAULT_FREQ_HZ,
            })
            .collect();
        Self {
            board,
            channels,
            interlock_ms: 0,
            edge_cooldown_ms: EDGE_COOLDOWN_DEFAULT_MS,
            poll_interval_ms: 5,
            watchdog_timeout_secs: 10,
        }
    }

    /// 1-based channel lookup.
    pub fn channel(&self, id: u8) -> Option<&ChannelConfig> {
        self.channels.get(usize::from(id).checked_sub(1)?)
    }

    pub fn channel_mut(&mut self, id: u8) -> Option<&mut ChannelConfig> {
        self.channels.get_mut(usize::from(id).checked_sub(1)?)
    }

    /// Range- and safety-check every field.  Returns the first problem.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.channels.is_empty() || self.channels.len() > MAX_CHANNELS {
            return Err("channel count out of range");
        }
        if self.interlock_ms > INTERLOCK_MAX_MS {
            return Err("interlock_ms above 5000");
        }
        if self.edge_cooldown_ms > DEBOUNCE_MAX_MS {
            return Err("edge_cooldown_ms too large");
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > 1_000 {
            return Err("poll_interval_ms out of range");
        }
        if self.watchdog_timeout_secs == 0 {
            return Err("watchdog_timeout_secs must be positive");
        }

        for (i, ch) in self.channels.iter().enumerate() {
            if self.channels[..i].iter().any(|other| other.gpio == ch.gpio) {
                return Err("GPIO used by two channels");
            }
            let Some(caps) = pins::line_caps(i32::from(ch.gpio)) else {
                return Err("GPIO not usable");
            };
            if !ch.allowed.contains(ch.role) {
                return Err("role not allowed on channel");
            }
            for role in [Role::DigitalIn, Role::DigitalOut, Role::Pwm] {
                if ch.allowed.contains(role) && !caps.supports(role) {
                    return Err("allowed role not supported by line");
                }
            }
            if !(DEBOUNCE_MIN_MS..=DEBOUNCE_MAX_MS).contains(&ch.debounce_ms) {
                return Err("debounce_ms out of range");
            }
            if ch.pwm_freq_hz == 0 || ch.pwm_freq_hz > pins::PWM_MAX_FREQ_HZ {
                return Err("pwm_freq_hz out of range");
            }
            if ch.pull != Pull::None && !caps.internal_pull {
                return Err("line has no internal pull");
            }
            // Idle (inactive) output must sit at the strap's safe level.
            if let Some(safe) = caps.strap_safe {
                let idle = PinState::from(ch.active_low);
                if ch.allowed.contains(Role::DigitalOut) && idle != safe {
                    return Err("strap line idle level is unsafe");
                }
            }
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::for_board(BoardProfile::Trigger8)
    }
}
