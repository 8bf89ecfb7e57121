//! One physical I/O line and its role-specific state machine.
//!
//! A [`Channel`] is always in exactly one [`Mode`].  Each mode carries only
//! the state that is meaningful for it, so debounce fields cannot be
//! touched on an output and pulse fields cannot exist on an input:
//!
//! ```text
//!   Mode::Input  { debouncer }                      -- DigitalIn
//!   Mode::Output { active, pulse: Option<Pulse> }   -- DigitalOut
//!   Mode::Pwm    { freq_hz, duty, slot }            -- Pwm
//! ```
//!
//! The channel drives hardware only through the [`GpioPort`] and
//! [`PwmPort`] traits handed to each call.  Device-wide policy
//! (interlock, board wiring, strap handling, generator allocation) lives one
//! level up in [`ChannelSet`](crate::channel_set::ChannelSet).

pub mod debounce;
pub mod pwm;

use embedded_hal::digital::PinState;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::app::ports::{GpioPort, HwError, PwmPort};
use crate::error::RoleConflict;
use crate::pins::{self, LineCaps};

use debounce::Debouncer;
use pwm::PwmSlot;

/// Debounce window bounds (ms).
pub const DEBOUNCE_MIN_MS: u32 = 5;
pub const DEBOUNCE_MAX_MS: u32 = 10_000;

// ---------------------------------------------------------------------------
// Role and wiring vocabulary
// ---------------------------------------------------------------------------

/// Operating mode of a channel as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "INPUT")]
    DigitalIn,
    #[serde(rename = "OUTPUT")]
    DigitalOut,
    #[serde(rename = "PWM")]
    Pwm,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DigitalIn => "INPUT",
            Self::DigitalOut => "OUTPUT",
            Self::Pwm => "PWM",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::DigitalIn => 0b001,
            Self::DigitalOut => 0b010,
            Self::Pwm => 0b100,
        }
    }
}

/// Set of roles a channel's board wiring allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const INPUT: Self = Self(Role::DigitalIn.bit());
    pub const OUTPUT: Self = Self(Role::DigitalOut.bit());
    pub const PWM: Self = Self(Role::Pwm.bit());

    pub const fn with(self, role: Role) -> Self {
        Self(self.0 | role.bit())
    }

    pub const fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }
}

/// Input bias resistor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Static settings bound to a channel by [`Channel::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub debounce_ms: u32,
    /// Logical "active" is the low level (active-low opto or relay driver).
    pub inverted: bool,
    pub pull: Pull,
    pub pwm_freq_hz: u32,
    /// Duty to restore when the channel (re-)enters PWM.
    pub pwm_duty: u8,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            inverted: false,
            pull: Pull::None,
            pwm_freq_hz: pins::PWM_DEFAULT_FREQ_HZ,
            pwm_duty: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Mode (tagged per-role state)
// ---------------------------------------------------------------------------

/// A running timed assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub start_ms: u64,
    pub duration_ms: u32,
}

impl Pulse {
    fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.start_ms) >= u64::from(self.duration_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unconfigured,
    Input { debouncer: Debouncer },
    Output { active: bool, pulse: Option<Pulse> },
    Pwm { freq_hz: u32, duty: u8, slot: Option<PwmSlot> },
}

impl Mode {
    fn role(&self) -> Option<Role> {
        match self {
            Self::Unconfigured => None,
            Self::Input { .. } => Some(Role::DigitalIn),
            Self::Output { .. } => Some(Role::DigitalOut),
            Self::Pwm { .. } => Some(Role::Pwm),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

pub struct Channel {
    id: u8,
    pin: i32,
    caps: LineCaps,
    settings: LineSettings,
    mode: Mode,
    /// Every write bypasses the GPIO driver and hits the output registers.
    direct_drive: bool,
    last_change_ms: u64,
}

impl Channel {
    /// Bind channel `id` (1-based) to GPIO `pin`.  Nothing is written to
    /// the hardware until [`configure`](Self::configure).
    pub fn new(id: u8, pin: i32) -> Self {
        Self {
            id,
            pin,
            caps: pins::line_caps(pin).unwrap_or(LineCaps::UNUSABLE),
            settings: LineSettings::default(),
            mode: Mode::Unconfigured,
            direct_drive: false,
            last_change_ms: 0,
        }
    }

    /// Apply settings and enter `role`.  Returns `false` without touching
    /// anything if the channel is already configured or the line refuses
    /// the role; later role changes go through [`set_role`](Self::set_role).
    pub fn configure(
        &mut self,
        role: Role,
        settings: LineSettings,
        hw: &mut impl GpioPort,
        now_ms: u64,
    ) -> bool {
        if self.mode != Mode::Unconfigured {
            debug!("ch{}: configure ignored, already configured", self.id);
            return false;
        }

        let mut settings = settings;
        settings.debounce_ms = settings.debounce_ms.clamp(DEBOUNCE_MIN_MS, DEBOUNCE_MAX_MS);
        if !self.caps.internal_pull {
            settings.pull = Pull::None;
        }
        self.settings = settings;

        if !self.supports(role) {
            return false;
        }
        self.enter(role, hw, now_ms).is_ok()
    }

    /// Switch role.  Fails, leaving everything as it was, while a pulse is
    /// running or when the line cannot take `role`.  An output-capable role
    /// writes the idle level as its very first write.
    pub fn set_role(
        &mut self,
        role: Role,
        hw: &mut impl GpioPort,
        now_ms: u64,
    ) -> Result<(), RoleConflict> {
        if self.is_pulsing() {
            return Err(RoleConflict::PulseActive);
        }
        if !self.supports(role) {
            return Err(RoleConflict::Unsupported(role));
        }
        if self.mode.role() == Some(role) {
            return Ok(());
        }
        self.enter(role, hw, now_ms)
            .map_err(|_| RoleConflict::Unsupported(role))
    }

    fn enter(&mut self, role: Role, hw: &mut impl GpioPort, now_ms: u64) -> Result<(), HwError> {
        let mode = match role {
            Role::DigitalIn => {
                hw.configure_input(self.pin, self.settings.pull)?;
                let level = self.logical(hw.read(self.pin));
                Mode::Input {
                    debouncer: Debouncer::new(self.settings.debounce_ms, level, now_ms),
                }
            }
            Role::DigitalOut => {
                self.drive_mode(self.idle_level(), hw)?;
                Mode::Output {
                    active: false,
                    pulse: None,
                }
            }
            Role::Pwm => {
                // Generator is attached separately; until then the pin rests
                // at the strap level, or released for an ordinary line.
                self.drive_mode(self.caps.strap_safe.unwrap_or(self.idle_level()), hw)?;
                Mode::Pwm {
                    freq_hz: self.settings.pwm_freq_hz,
                    duty: self.settings.pwm_duty,
                    slot: None,
                }
            }
        };
        self.mode = mode;
        self.last_change_ms = now_ms;
        debug!("ch{}: GPIO{} -> {}", self.id, self.pin, role.as_str());
        Ok(())
    }

    /// Put the line into output mode at `level`.
    fn drive_mode(&self, level: PinState, hw: &mut impl GpioPort) -> Result<(), HwError> {
        if self.direct_drive {
            hw.write_direct(self.pin, level);
            Ok(())
        } else {
            hw.configure_output(self.pin, level)
        }
    }

    fn write(&self, level: PinState, hw: &mut impl GpioPort) {
        if self.direct_drive {
            hw.write_direct(self.pin, level);
        } else {
            hw.write(self.pin, level);
        }
    }

    // ── Input ────────────────────────────────────────────────

    /// Read and debounce the line.  Returns `Some(active)` exactly once per
    /// stable transition; `None` otherwise and for non-input roles.
    pub fn sample(&mut self, hw: &mut impl GpioPort, now_ms: u64) -> Option<bool> {
        let raw = self.logical(hw.read(self.pin));
        let Mode::Input { debouncer } = &mut self.mode else {
            return None;
        };
        let changed = debouncer.update(raw, now_ms);
        if changed.is_some() {
            self.last_change_ms = now_ms;
        }
        changed
    }

    /// Debounced, polarity-corrected logical state.  For outputs this is
    /// the commanded state; for PWM, whether the duty is non-zero.
    pub fn is_active(&self) -> bool {
        match self.mode {
            Mode::Unconfigured => false,
            Mode::Input { debouncer } => debouncer.stable(),
            Mode::Output { active, .. } => active,
            Mode::Pwm { duty, .. } => duty > 0,
        }
    }

    // ── Digital output ───────────────────────────────────────

    /// Immediate write of the logical level.
    pub fn set_output(
        &mut self,
        active: bool,
        hw: &mut impl GpioPort,
        now_ms: u64,
    ) -> Result<(), RoleConflict> {
        let level = self.level_for(active);
        match &mut self.mode {
            Mode::Output { pulse: Some(_), .. } => Err(RoleConflict::PulseActive),
            Mode::Output { active: current, .. } => {
                *current = active;
                self.write(level, hw);
                self.last_change_ms = now_ms;
                Ok(())
            }
            other => Err(conflict_for(other)),
        }
    }

    /// Start a timed assertion; [`update`](Self::update) ends it.
    pub fn pulse(
        &mut self,
        duration_ms: u32,
        hw: &mut impl GpioPort,
        now_ms: u64,
    ) -> Result<(), RoleConflict> {
        let level = self.level_for(true);
        match &mut self.mode {
            Mode::Output { pulse: Some(_), .. } => Err(RoleConflict::PulseActive),
            Mode::Output { active, pulse } => {
                *active = true;
                *pulse = Some(Pulse {
                    start_ms: now_ms,
                    duration_ms,
                });
                self.write(level, hw);
                self.last_change_ms = now_ms;
                Ok(())
            }
            other => Err(conflict_for(other)),
        }
    }

    /// De-assert an expired pulse.  Returns `true` exactly once per pulse,
    /// on the poll that ends it.
    pub fn update(&mut self, hw: &mut impl GpioPort, now_ms: u64) -> bool {
        let idle = self.idle_level();
        let Mode::Output { active, pulse } = &mut self.mode else {
            return false;
        };
        if !pulse.is_some_and(|p| p.expired(now_ms)) {
            return false;
        }
        *pulse = None;
        *active = false;
        self.write(idle, hw);
        self.last_change_ms = now_ms;
        true
    }

    pub fn is_pulsing(&self) -> bool {
        matches!(self.mode, Mode::Output { pulse: Some(_), .. })
    }

    pub fn pulse_state(&self) -> Option<Pulse> {
        match self.mode {
            Mode::Output { pulse, .. } => pulse,
            _ => None,
        }
    }

    // ── PWM ──────────────────────────────────────────────────

    /// Program `slot` with this channel's pin, frequency and duty.
    pub fn attach_pwm(&mut self, slot: PwmSlot, hw: &mut impl PwmPort) -> Result<(), HwError> {
        let Mode::Pwm {
            freq_hz,
            duty,
            slot: current,
        } = &mut self.mode
        else {
            return Err(HwError::Unsupported);
        };
        hw.pwm_configure(slot, self.pin, *freq_hz, *duty)?;
        *current = Some(slot);
        Ok(())
    }

    /// Stop the generator and hand its slot back.  The pin is left low.
    pub fn detach_pwm(&mut self, hw: &mut impl PwmPort) -> Option<PwmSlot> {
        let Mode::Pwm { slot, .. } = &mut self.mode else {
            return None;
        };
        let taken = slot.take()?;
        hw.pwm_release(taken, self.pin);
        Some(taken)
    }

    /// Set the 8-bit duty.  Out-of-range values are clamped, not rejected.
    pub fn set_pwm_duty(
        &mut self,
        duty: i32,
        hw: &mut impl PwmPort,
        now_ms: u64,
    ) -> Result<u8, RoleConflict> {
        let clamped = duty.clamp(0, 255) as u8;
        match &mut self.mode {
            Mode::Pwm { duty, slot, .. } => {
                *duty = clamped;
                if let Some(slot) = slot {
                    hw.pwm_set_duty(*slot, clamped);
                }
            }
            other => return Err(conflict_for(other)),
        }
        self.settings.pwm_duty = clamped;
        self.last_change_ms = now_ms;
        Ok(clamped)
    }

    /// Percent form of [`set_pwm_duty`](Self::set_pwm_duty); clamps to 0–100.
    pub fn set_pwm_duty_percent(
        &mut self,
        percent: f32,
        hw: &mut impl PwmPort,
        now_ms: u64,
    ) -> Result<u8, RoleConflict> {
        self.set_pwm_duty(percent_to_duty(percent), hw, now_ms)
    }

    /// Reprogram the generator frequency, keeping the duty.
    pub fn set_pwm_frequency(
        &mut self,
        hz: u32,
        hw: &mut impl PwmPort,
        now_ms: u64,
    ) -> Result<(), HwError> {
        let Mode::Pwm { freq_hz, slot, .. } = &mut self.mode else {
            return Err(HwError::Unsupported);
        };
        if let Some(slot) = slot {
            hw.pwm_set_frequency(*slot, hz)?;
        }
        *freq_hz = hz;
        self.settings.pwm_freq_hz = hz;
        self.last_change_ms = now_ms;
        Ok(())
    }

    pub fn pwm_duty(&self) -> Option<u8> {
        match self.mode {
            Mode::Pwm { duty, .. } => Some(duty),
            _ => None,
        }
    }

    pub fn pwm_frequency(&self) -> Option<u32> {
        match self.mode {
            Mode::Pwm { freq_hz, .. } => Some(freq_hz),
            _ => None,
        }
    }

    pub fn pwm_slot(&self) -> Option<PwmSlot> {
        match self.mode {
            Mode::Pwm { slot, .. } => slot,
            _ => None,
        }
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn pin(&self) -> i32 {
        self.pin
    }

    pub fn role(&self) -> Option<Role> {
        self.mode.role()
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn caps(&self) -> LineCaps {
        self.caps
    }

    /// Whether the line can take `role` with the current polarity.  A
    /// strap line only drives as an output when its released level is the
    /// safe one; as an input the polarity is free.
    pub fn supports(&self, role: Role) -> bool {
        if !self.caps.supports(role) {
            return false;
        }
        match (role, self.caps.strap_safe) {
            (Role::DigitalOut, Some(safe)) => self.idle_level() == safe,
            _ => true,
        }
    }

    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    pub fn last_change_ms(&self) -> u64 {
        self.last_change_ms
    }

    /// Switch this channel to raw register writes for good.  Used when the
    /// GPIO driver refuses a strap line.
    pub fn enable_direct_drive(&mut self) {
        self.direct_drive = true;
    }

    pub fn is_direct_drive(&self) -> bool {
        self.direct_drive
    }

    /// Physical level of the released / inactive output.
    pub fn idle_level(&self) -> PinState {
        self.level_for(false)
    }

    fn level_for(&self, active: bool) -> PinState {
        PinState::from(active != self.settings.inverted)
    }

    fn logical(&self, level: PinState) -> bool {
        (level == PinState::High) != self.settings.inverted
    }
}

/// Convert a 0–100 % duty to the 8-bit scale.  NaN reads as 0.
pub fn percent_to_duty(percent: f32) -> i32 {
    if percent.is_nan() {
        return 0;
    }
    (percent.clamp(0.0, 100.0) * 255.0 / 100.0).round() as i32
}

fn conflict_for(mode: &Mode) -> RoleConflict {
    match mode {
        Mode::Input { .. } | Mode::Unconfigured => RoleConflict::InInput,
        Mode::Pwm { .. } => RoleConflict::InPwm,
        Mode::Output { .. } => RoleConflict::NotPwm,
    }
}
