//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ChannelSet / RuleEngine / AppService
//! ```
//!
//! Driven adapters (GPIO, LEDC, NVS, notification transports, log sinks)
//! implement these traits.  The domain consumes them via generics, so the
//! channel core never touches hardware directly and every test can swap in
//! a recording mock.
//!
//! ## Safety notes
//!
//! - **GpioPort::configure_output** MUST drive `initial` before the line
//!   becomes an output.  Strap lines depend on it.
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **KvStore** keys are at most [`MAX_KEY_LEN`] characters; longer keys
//!   are an error, never silently truncated.

use embedded_hal::digital::PinState;

use crate::channel::Pull;
use crate::channel::pwm::PwmSlot;
use crate::config::DeviceConfig;
use crate::error::Result;

// ───────────────────────────────────────────────────────────────
// GPIO port (driven adapter: domain → pins)
// ───────────────────────────────────────────────────────────────

/// Digital line access.
pub trait GpioPort {
    /// Make `pin` an input with the given bias.
    fn configure_input(&mut self, pin: i32, pull: Pull) -> core::result::Result<(), HwError>;

    /// Make `pin` an output.  The line must already sit at `initial` when
    /// the output driver is enabled.
    fn configure_output(&mut self, pin: i32, initial: PinState) -> core::result::Result<(), HwError>;

    /// Write through the GPIO driver.
    fn write(&mut self, pin: i32, level: PinState);

    /// Write straight to the output set/clear registers, bypassing the
    /// driver.  Also enables the output.
    fn write_direct(&mut self, pin: i32, level: PinState);

    /// Current physical level.
    fn read(&self, pin: i32) -> PinState;
}

// ───────────────────────────────────────────────────────────────
// PWM port (driven adapter: domain → LEDC generators)
// ───────────────────────────────────────────────────────────────

/// Hardware PWM generator access, addressed by pool slot.
pub trait PwmPort {
    /// Bind `slot` to `pin` and start it at `freq_hz` / `duty` (8-bit).
    fn pwm_configure(
        &mut self,
        slot: PwmSlot,
        pin: i32,
        freq_hz: u32,
        duty: u8,
    ) -> core::result::Result<(), HwError>;

    fn pwm_set_duty(&mut self, slot: PwmSlot, duty: u8);

    /// Re-program the generator frequency without touching the duty.
    fn pwm_set_frequency(&mut self, slot: PwmSlot, freq_hz: u32) -> core::result::Result<(), HwError>;

    /// Stop the generator and leave `pin` low.
    fn pwm_release(&mut self, slot: PwmSlot, pin: i32);
}

// ───────────────────────────────────────────────────────────────
// Pulse target (rule engine → channel set)
// ───────────────────────────────────────────────────────────────

/// Who asked for a pulse.  Recorded with the pulse and echoed in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PulseSource {
    None,
    RemoteCommand,
    PhysicalInput,
    ApiRequest,
}

impl PulseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RemoteCommand => "remote-command",
            Self::PhysicalInput => "physical-input",
            Self::ApiRequest => "api-request",
        }
    }
}

/// Anything that can start a pulse on a channel.  The rule engine only
/// sees this, not the whole channel set.
pub trait PulseTarget {
    fn start_pulse(
        &mut self,
        channel: u8,
        duration_ms: u32,
        source: PulseSource,
        now_ms: u64,
    ) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log, MQTT,
/// websocket, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Notification sink (driven adapter: domain → webhook / push)
// ───────────────────────────────────────────────────────────────

/// Fire-and-forget delivery of rule notifications.  Delivery failures are
/// the sink's concern.
pub trait NotificationSink {
    /// `mask` selects notification targets; `timestamp` is ISO-8601 UTC.
    fn send(&mut self, mask: u8, channel: u8, active: bool, timestamp: &str);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the device configuration.
///
/// Implementations MUST call [`DeviceConfig::validate`] before persisting
/// and reject invalid configs with [`ConfigError::ValidationFailed`].
/// A config that drives a strap line to its unsafe level must never reach
/// flash, since the next boot would apply it before anything can object.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`ConfigError::NotFound`] on first boot.
    fn load(&self) -> core::result::Result<DeviceConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &DeviceConfig) -> core::result::Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Key-value store (driven adapter: domain ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Longest key the store accepts (NVS limit).
pub const MAX_KEY_LEN: usize = 15;

/// Typed key-value store with read defaults.
///
/// Reads never fail: a missing key or a type mismatch yields `default`.
/// Writes are atomic per key.
pub trait KvStore {
    fn get_int(&self, key: &str, default: i32) -> i32;
    fn get_string(&self, key: &str, default: &str) -> heapless::String<64>;
    fn get_bool(&self, key: &str, default: bool) -> bool;

    fn set_int(&mut self, key: &str, value: i32) -> core::result::Result<(), StorageError>;
    fn set_string(&mut self, key: &str, value: &str) -> core::result::Result<(), StorageError>;
    fn set_bool(&mut self, key: &str, value: bool) -> core::result::Result<(), StorageError>;

    fn has_key(&self, key: &str) -> bool;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn remove(&mut self, key: &str) -> core::result::Result<(), StorageError>;
}

/// Reject keys the backing store cannot hold.
pub fn check_key(key: &str) -> core::result::Result<(), StorageError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StorageError::KeyTooLong);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`GpioPort`] / [`PwmPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwError {
    /// The driver path is not available for this line.
    Unsupported,
    /// Driver returned an error code.
    Driver(i32),
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed validation.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`KvStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Key is empty or longer than [`MAX_KEY_LEN`].
    KeyTooLong,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for HwError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unsupported => write!(f, "driver path unsupported"),
            Self::Driver(code) => write!(f, "driver error {}", code),
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::KeyTooLong => write!(f, "key too long"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
