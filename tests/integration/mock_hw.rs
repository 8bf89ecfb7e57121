//! Mock adapters for integration tests.
//!
//! [`MockIo`] records every GPIO and LEDC call, and every level the pads
//! were actually driven to, so tests can assert on the full history
//! without touching real registers.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use embedded_hal::digital::PinState;
use relaynode::app::events::AppEvent;
use relaynode::app::ports::{
    ConfigError, ConfigPort, EventSink, GpioPort, HwError, KvStore, NotificationSink, PwmPort,
    StorageError, check_key,
};
use relaynode::channel::Pull;
use relaynode::channel::pwm::PwmSlot;
use relaynode::config::DeviceConfig;

// ── Hardware call record ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwCall {
    ConfigureInput { pin: i32, pull: Pull },
    ConfigureOutput { pin: i32, initial: PinState },
    Write { pin: i32, level: PinState },
    WriteDirect { pin: i32, level: PinState },
    PwmConfigure { slot: u8, pin: i32, freq_hz: u32, duty: u8 },
    PwmSetDuty { slot: u8, duty: u8 },
    PwmSetFrequency { slot: u8, freq_hz: u32 },
    PwmRelease { slot: u8, pin: i32 },
}

// ── MockIo ────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockIo {
    pub calls: Vec<HwCall>,
    /// Every level a pad was driven to, in order.
    pub driven: Vec<(i32, PinState)>,
    inputs: HashMap<i32, PinState>,
    latch: HashMap<i32, PinState>,
    outputs: HashSet<i32>,
    refused: HashSet<i32>,
    refuse_pwm: bool,
    pwm: HashMap<u8, (i32, u32, u8)>,
}

#[allow(dead_code)]
impl MockIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, pin: i32, level: PinState) {
        self.inputs.insert(pin, level);
    }

    /// GPIO driver calls on `pin` fail from now on.
    pub fn refuse_driver(&mut self, pin: i32) {
        self.refused.insert(pin);
    }

    /// Every LEDC setup fails from now on.
    pub fn refuse_pwm(&mut self) {
        self.refuse_pwm = true;
    }

    /// Levels `pin` was driven to, oldest first.
    pub fn driven_levels(&self, pin: i32) -> Vec<PinState> {
        self.driven
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, l)| *l)
            .collect()
    }

    pub fn level(&self, pin: i32) -> PinState {
        self.read(pin)
    }

    /// (pin, freq, duty) of a running generator.
    pub fn pwm_output(&self, slot: u8) -> Option<(i32, u32, u8)> {
        self.pwm.get(&slot).copied()
    }

    pub fn calls_for(&self, pin: i32) -> Vec<HwCall> {
        self.calls
            .iter()
            .copied()
            .filter(|c| match *c {
                HwCall::ConfigureInput { pin: p, .. }
                | HwCall::ConfigureOutput { pin: p, .. }
                | HwCall::Write { pin: p, .. }
                | HwCall::WriteDirect { pin: p, .. }
                | HwCall::PwmConfigure { pin: p, .. }
                | HwCall::PwmRelease { pin: p, .. } => p == pin,
                _ => false,
            })
            .collect()
    }

    fn drive(&mut self, pin: i32, level: PinState) {
        self.latch.insert(pin, level);
        self.outputs.insert(pin);
        self.driven.push((pin, level));
    }
}

impl GpioPort for MockIo {
    fn configure_input(&mut self, pin: i32, pull: Pull) -> Result<(), HwError> {
        self.calls.push(HwCall::ConfigureInput { pin, pull });
        if self.refused.contains(&pin) {
            return Err(HwError::Driver(-1));
        }
        self.outputs.remove(&pin);
        Ok(())
    }

    fn configure_output(&mut self, pin: i32, initial: PinState) -> Result<(), HwError> {
        self.calls.push(HwCall::ConfigureOutput { pin, initial });
        if self.refused.contains(&pin) {
            return Err(HwError::Driver(-1));
        }
        self.drive(pin, initial);
        Ok(())
    }

    fn write(&mut self, pin: i32, level: PinState) {
        self.calls.push(HwCall::Write { pin, level });
        if !self.refused.contains(&pin) && self.outputs.contains(&pin) {
            self.drive(pin, level);
        }
    }

    fn write_direct(&mut self, pin: i32, level: PinState) {
        self.calls.push(HwCall::WriteDirect { pin, level });
        self.drive(pin, level);
    }

    fn read(&self, pin: i32) -> PinState {
        if self.outputs.contains(&pin) {
            self.latch.get(&pin).copied().unwrap_or(PinState::Low)
        } else {
            self.inputs.get(&pin).copied().unwrap_or(PinState::Low)
        }
    }
}

impl PwmPort for MockIo {
    fn pwm_configure(&mut self, slot: PwmSlot, pin: i32, freq_hz: u32, duty: u8) -> Result<(), HwError> {
        let slot = slot.index();
        self.calls.push(HwCall::PwmConfigure { slot, pin, freq_hz, duty });
        if self.refuse_pwm {
            return Err(HwError::Driver(-2));
        }
        self.pwm.insert(slot, (pin, freq_hz, duty));
        Ok(())
    }

    fn pwm_set_duty(&mut self, slot: PwmSlot, duty: u8) {
        let slot = slot.index();
        self.calls.push(HwCall::PwmSetDuty { slot, duty });
        if let Some(out) = self.pwm.get_mut(&slot) {
            out.2 = duty;
        }
    }

    fn pwm_set_frequency(&mut self, slot: PwmSlot, freq_hz: u32) -> Result<(), HwError> {
        let slot = slot.index();
        self.calls.push(HwCall::PwmSetFrequency { slot, freq_hz });
        let out = self.pwm.get_mut(&slot).ok_or(HwError::Unsupported)?;
        out.1 = freq_hz;
        Ok(())
    }

    fn pwm_release(&mut self, slot: PwmSlot, pin: i32) {
        let slot = slot.index();
        self.calls.push(HwCall::PwmRelease { slot, pin });
        self.pwm.remove(&slot);
        self.drive(pin, PinState::Low);
    }
}

// ── MockStore ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i32),
    Str(String),
    Bool(bool),
}

/// In-memory KV + config store with write-failure injection.
#[derive(Default)]
pub struct MockStore {
    values: HashMap<String, Value>,
    config: RefCell<Option<DeviceConfig>>,
    pub saves: RefCell<u32>,
    pub fail_writes: bool,
    /// Writes that still succeed before every later one fails.
    pub writes_left: Option<u32>,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        check_key(key)?;
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        if let Some(left) = &mut self.writes_left {
            if *left == 0 {
                return Err(StorageError::IoError);
            }
            *left -= 1;
        }
        self.values.insert(key.to_owned(), value);
        Ok(())
    }
}

impl KvStore for MockStore {
    fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.values.get(key) {
            Some(Value::Int(v)) => *v,
            _ => default,
        }
    }

    fn get_string(&self, key: &str, default: &str) -> heapless::String<64> {
        let s = match self.values.get(key) {
            Some(Value::Str(s)) => s.as_str(),
            _ => default,
        };
        heapless::String::try_from(s).unwrap_or_default()
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(v)) => *v,
            _ => default,
        }
    }

    fn set_int(&mut self, key: &str, value: i32) -> Result<(), StorageError> {
        self.put(key, Value::Int(value))
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.put(key, Value::Str(value.to_owned()))
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), StorageError> {
        self.put(key, Value::Bool(value))
    }

    fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;
        self.values.remove(key);
        Ok(())
    }
}

impl ConfigPort for MockStore {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        self.config.borrow().clone().ok_or(ConfigError::NotFound)
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::ValidationFailed)?;
        *self.config.borrow_mut() = Some(config.clone());
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

// ── Sinks ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub mask: u8,
    pub channel: u8,
    pub active: bool,
    pub timestamp: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Vec<Sent>,
}

impl NotificationSink for RecordingNotifier {
    fn send(&mut self, mask: u8, channel: u8, active: bool, timestamp: &str) {
        self.sent.push(Sent {
            mask,
            channel,
            active,
            timestamp: timestamp.to_owned(),
        });
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(*event);
    }
}
