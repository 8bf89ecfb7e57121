//! Unified error types for the channel I/O core.
//!
//! Every public operation of [`ChannelSet`](crate::channel_set::ChannelSet),
//! [`RuleEngine`](crate::rules::RuleEngine) and
//! [`AppService`](crate::app::service::AppService) returns one of these
//! instead of panicking.  All variants are `Copy` so they can be logged,
//! stored in events and forwarded to the API layer without allocation.

use core::fmt;

use crate::channel::Role;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Reason an operation on the channel core was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Channel id out of range, or the channel's class forbids the operation.
    InvalidChannel(u8),
    /// The operation is not valid for the channel's current role.
    RoleConflict(RoleConflict),
    /// Global pulse exclusivity or the interlock window blocks the request.
    InterlockBusy(Busy),
    /// No PWM generator could be used.  Recovered locally by falling back
    /// to `fallback`; reported as a notice, never as a failure.
    HardwareResourceExhausted { fallback: Role },
    /// A rule or config value is unusable.
    ConfigurationInvalid(&'static str),
}

impl Error {
    /// Short, user-facing reason code for API responses.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidChannel(_) => "Invalid channel",
            Self::RoleConflict(c) => c.reason(),
            Self::InterlockBusy(b) => b.reason(),
            Self::HardwareResourceExhausted { fallback: Role::DigitalIn } => {
                "No PWM generator available, using INPUT"
            }
            Self::HardwareResourceExhausted { .. } => "No PWM generator available, using OUTPUT",
            Self::ConfigurationInvalid(msg) => msg,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChannel(ch) => write!(f, "invalid channel {ch}"),
            Self::RoleConflict(c) => write!(f, "role conflict: {c}"),
            Self::InterlockBusy(b) => write!(f, "interlock busy: {b}"),
            Self::HardwareResourceExhausted { fallback } => {
                write!(f, "hardware resource exhausted, running as {}", fallback.as_str())
            }
            Self::ConfigurationInvalid(msg) => write!(f, "configuration invalid: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Role conflicts
// ---------------------------------------------------------------------------

/// Why an operation clashed with a channel's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleConflict {
    /// Channel is an input; outputs cannot be driven.
    InInput,
    /// Channel is in PWM role; pulses and digital writes are refused.
    InPwm,
    /// Channel is a digital output; PWM operations are refused.
    NotPwm,
    /// A pulse is running on this channel, so its role and level are frozen.
    PulseActive,
    /// The board wiring or the physical line does not allow this role.
    Unsupported(Role),
}

impl RoleConflict {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InInput => "Trigger is in INPUT mode",
            Self::InPwm => "Trigger is in PWM mode",
            Self::NotPwm => "Trigger is not in PWM mode",
            Self::PulseActive => "Pulse active on trigger",
            Self::Unsupported(Role::DigitalIn) => "Input mode not supported on this trigger",
            Self::Unsupported(Role::DigitalOut) => "Output mode not supported on this trigger",
            Self::Unsupported(Role::Pwm) => "PWM mode not supported on this trigger",
        }
    }
}

impl fmt::Display for RoleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

impl From<RoleConflict> for Error {
    fn from(c: RoleConflict) -> Self {
        Self::RoleConflict(c)
    }
}

// ---------------------------------------------------------------------------
// Interlock
// ---------------------------------------------------------------------------

/// Which half of the device-wide interlock refused a pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    /// Another (or the same) channel is pulsing right now.
    PulseActive { channel: u8 },
    /// The previous pulse ended less than `interlock_ms` ago.
    Cooldown { remaining_ms: u32 },
}

impl Busy {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PulseActive { .. } => "Pulse already active",
            Self::Cooldown { .. } => "Interlock active",
        }
    }
}

impl fmt::Display for Busy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PulseActive { channel } => write!(f, "pulse active on channel {channel}"),
            Self::Cooldown { remaining_ms } => write!(f, "interlock for another {remaining_ms} ms"),
        }
    }
}

impl From<Busy> for Error {
    fn from(b: Busy) -> Self {
        Self::InterlockBusy(b)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
