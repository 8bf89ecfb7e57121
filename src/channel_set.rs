//! Device-level channel manager.
//!
//! [`ChannelSet`] owns every [`Channel`] of one device together with the
//! hardware adapter, and enforces the policies no single channel can:
//!
//! - **Global pulse exclusivity.**  At most one channel pulses at a time,
//!   and a new pulse may not start within `interlock_ms` of the previous
//!   pulse's end, whichever channel it was on.
//! - **Board wiring.**  Each channel only takes the roles its board row
//!   allows.
//! - **Strap lines.**  A boot-strap line is driven to its safe level by a
//!   direct register write before any role transition.  If the GPIO
//!   driver refuses the line, the channel switches to direct register
//!   control for good.
//! - **PWM generators.**  A small fixed pool.  A generator is reserved
//!   before the line leaves its role; when none can be used the channel
//!   falls back to plain digital output instead of failing.
//! - **Edge reporting.**  Debounced input transitions become
//!   [`ChannelEvent::InputChanged`] unless they arrive within the edge
//!   cooldown of the previous accepted edge on that channel.
//!
//! Call order within one loop iteration is up to the host: calling
//! [`sample`](ChannelSet::sample) before [`update`](ChannelSet::update)
//! lets rule-triggered pulses start in the same iteration.

use core::fmt::Write as _;

use log::{debug, error, info, warn};

use crate::app::ports::{GpioPort, PulseSource, PulseTarget, PwmPort};
use crate::channel::pwm::{PwmPool, PwmSlot};
use crate::channel::{Channel, Role, RoleSet};
use crate::config::{DeviceConfig, INTERLOCK_MAX_MS, MAX_CHANNELS};
use crate::error::{Busy, Error, Result, RoleConflict};
use crate::events::{ChannelEvent, EventQueue};
use crate::pins;

/// How a successful [`ChannelSet::set_role`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleOutcome {
    /// Channel already had the requested role.
    Unchanged,
    Switched,
    /// PWM was requested but no generator was usable; the channel now
    /// runs in the carried role.
    FellBack(Role),
}

impl RoleOutcome {
    /// Non-fatal condition to pass on to the caller, if any.
    pub fn notice(self) -> Option<Error> {
        match self {
            Self::FellBack(fallback) => Some(Error::HardwareResourceExhausted { fallback }),
            Self::Unchanged | Self::Switched => None,
        }
    }
}

/// Read-only snapshot of one channel for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub channel: u8,
    pub pin: i32,
    pub role: Option<Role>,
    pub active: bool,
    pub pulsing: bool,
    /// Duration of the running pulse.
    pub pulse_ms: Option<u32>,
    pub pwm_duty: Option<u8>,
    pub pwm_freq_hz: Option<u32>,
    pub debounce_ms: u32,
    pub direct_drive: bool,
    /// Monotonic time of the last observable change.
    pub last_updated_ms: u64,
}

struct Slot {
    channel: Channel,
    allowed: RoleSet,
    /// Stable state seen by the previous edge scan.
    prev_active: bool,
    last_edge_ms: Option<u64>,
}

pub struct ChannelSet<H: GpioPort + PwmPort> {
    hw: H,
    slots: heapless::Vec<Slot, MAX_CHANNELS>,
    pwm: PwmPool,
    interlock_ms: u32,
    edge_cooldown_ms: u32,
    last_pulse_end_ms: Option<u64>,
    /// Channel id currently pulsing, 0 = none.
    pulsing: u8,
    source: PulseSource,
    events: EventQueue,
}

impl<H: GpioPort + PwmPort> ChannelSet<H> {
    /// Bring every channel of `config` up in its persisted role.
    pub fn new(config: &DeviceConfig, hw: H, now_ms: u64) -> Self {
        let mut set = Self {
            hw,
            slots: heapless::Vec::new(),
            pwm: PwmPool::default(),
            interlock_ms: config.interlock_ms.min(INTERLOCK_MAX_MS),
            edge_cooldown_ms: config.edge_cooldown_ms,
            last_pulse_end_ms: None,
            pulsing: 0,
            source: PulseSource::None,
            events: EventQueue::new(),
        };

        for (i, cfg) in config.channels.iter().enumerate() {
            let slot = Slot {
                channel: Channel::new(i as u8 + 1, i32::from(cfg.gpio)),
                allowed: cfg.allowed,
                prev_active: false,
                last_edge_ms: None,
            };
            if set.slots.push(slot).is_err() {
                warn!("more than {} channels configured, ignoring the rest", MAX_CHANNELS);
                break;
            }
            set.bring_up(i, cfg, now_ms);
        }

        info!(
            "ChannelSet: {} channels, interlock={}ms, {} PWM generators free",
            set.slots.len(),
            set.interlock_ms,
            set.pwm.available()
        );
        set
    }

    fn bring_up(&mut self, idx: usize, cfg: &crate::config::ChannelConfig, now_ms: u64) {
        let channel = &mut self.slots[idx].channel;
        let caps = channel.caps();
        let id = channel.id();

        if let Some(safe) = caps.strap_safe {
            self.hw.write_direct(channel.pin(), safe);
        }
        let mut ok = channel.configure(cfg.role, cfg.settings(), &mut self.hw, now_ms);
        if !ok && caps.strap_safe.is_some() && channel.supports(cfg.role) {
            warn!("ch{}: driver refused strap GPIO{}, using direct register control", id, channel.pin());
            channel.enable_direct_drive();
            ok = channel.configure(cfg.role, cfg.settings(), &mut self.hw, now_ms);
        }
        if !ok {
            error!("ch{}: GPIO{} could not be configured as {}", id, cfg.gpio, cfg.role.as_str());
            return;
        }

        if cfg.role == Role::Pwm {
            self.attach_or_fall_back(idx, now_ms);
        }
        let slot = &mut self.slots[idx];
        slot.prev_active = slot.channel.is_active();
    }

    fn index(&self, channel: u8) -> Result<usize> {
        usize::from(channel)
            .checked_sub(1)
            .filter(|&i| i < self.slots.len())
            .ok_or(Error::InvalidChannel(channel))
    }

    // ── Polling ──────────────────────────────────────────────

    /// Sample and debounce every input, then run edge detection.
    pub fn sample(&mut self, now_ms: u64) {
        for slot in &mut self.slots {
            slot.channel.sample(&mut self.hw, now_ms);
        }
        self.handle_input_edges(now_ms);
    }

    /// Compare each input's stable state with the previous scan and queue
    /// an [`ChannelEvent::InputChanged`] per accepted transition.
    /// Transitions inside the edge cooldown are dropped, not deferred.
    pub fn handle_input_edges(&mut self, now_ms: u64) {
        for slot in &mut self.slots {
            if slot.channel.role() != Some(Role::DigitalIn) {
                continue;
            }
            let active = slot.channel.is_active();
            if active == slot.prev_active {
                continue;
            }
            slot.prev_active = active;

            let cooled = slot
                .last_edge_ms
                .is_none_or(|t| now_ms.saturating_sub(t) >= u64::from(self.edge_cooldown_ms));
            if !cooled {
                debug!("ch{}: edge inside cooldown dropped", slot.channel.id());
                continue;
            }
            slot.last_edge_ms = Some(now_ms);
            self.events.push(ChannelEvent::InputChanged {
                channel: slot.channel.id(),
                active,
                at_ms: now_ms,
            });
        }
    }

    /// End expired pulses.
    pub fn update(&mut self, now_ms: u64) {
        for slot in &mut self.slots {
            if !slot.channel.update(&mut self.hw, now_ms) {
                continue;
            }
            let id = slot.channel.id();
            if self.pulsing == id {
                self.pulsing = 0;
            }
            self.last_pulse_end_ms = Some(now_ms);
            self.events.push(ChannelEvent::PulseEnded {
                channel: id,
                source: self.source,
                at_ms: now_ms,
            });
            info!("ch{}: pulse ended ({})", id, self.source.as_str());
            self.source = PulseSource::None;
        }
    }

    // ── Pulses ───────────────────────────────────────────────

    /// Start a timed assertion on `channel`, subject to the interlock.
    pub fn start_pulse(
        &mut self,
        channel: u8,
        duration_ms: u32,
        source: PulseSource,
        now_ms: u64,
    ) -> Result<()> {
        let idx = self.index(channel)?;
        let slot = &self.slots[idx];
        match slot.channel.role() {
            Some(Role::DigitalOut) => {}
            Some(Role::DigitalIn) => return Err(RoleConflict::InInput.into()),
            Some(Role::Pwm) => return Err(RoleConflict::InPwm.into()),
            None => return Err(Error::InvalidChannel(channel)),
        }
        if !slot.allowed.contains(Role::DigitalOut) {
            return Err(Error::InvalidChannel(channel));
        }
        if self.pulsing != 0 {
            return Err(Busy::PulseActive {
                channel: self.pulsing,
            }
            .into());
        }
        if let Some(remaining_ms) = self.interlock_remaining(now_ms) {
            return Err(Busy::Cooldown { remaining_ms }.into());
        }
        if duration_ms == 0 {
            return Err(Error::ConfigurationInvalid("Pulse duration must be positive"));
        }

        self.slots[idx]
            .channel
            .pulse(duration_ms, &mut self.hw, now_ms)?;
        self.pulsing = channel;
        self.source = source;
        self.events.push(ChannelEvent::PulseStarted {
            channel,
            source,
            duration_ms,
            at_ms: now_ms,
        });
        info!("ch{}: pulse {}ms ({})", channel, duration_ms, source.as_str());
        Ok(())
    }

    /// Time left before the interlock opens, `None` if it is open.
    pub fn interlock_remaining(&self, now_ms: u64) -> Option<u32> {
        let end = self.last_pulse_end_ms?;
        let elapsed = now_ms.saturating_sub(end);
        let window = u64::from(self.interlock_ms);
        (elapsed < window).then(|| (window - elapsed) as u32)
    }

    pub fn is_any_pulse_active(&self) -> bool {
        self.pulsing != 0
    }

    /// Channel id currently pulsing.
    pub fn pulsing_channel(&self) -> Option<u8> {
        (self.pulsing != 0).then_some(self.pulsing)
    }

    pub fn pulse_source(&self) -> PulseSource {
        self.source
    }

    pub fn interlock_ms(&self) -> u32 {
        self.interlock_ms
    }

    /// Set the interlock window, clamped to 0–5000 ms.  Returns the
    /// applied value.
    pub fn set_interlock_ms(&mut self, ms: u32) -> u32 {
        self.interlock_ms = ms.min(INTERLOCK_MAX_MS);
        self.interlock_ms
    }

    pub fn edge_cooldown_ms(&self) -> u32 {
        self.edge_cooldown_ms
    }

    pub fn set_edge_cooldown_ms(&mut self, ms: u32) {
        self.edge_cooldown_ms = ms;
    }

    // ── Outputs ──────────────────────────────────────────────

    /// Immediate digital write.
    pub fn set_output(&mut self, channel: u8, active: bool, now_ms: u64) -> Result<()> {
        let idx = self.index(channel)?;
        self.slots[idx]
            .channel
            .set_output(active, &mut self.hw, now_ms)?;
        Ok(())
    }

    /// Set the 8-bit duty of a PWM channel.  Returns the clamped duty.
    pub fn set_pwm_duty(&mut self, channel: u8, duty: i32, now_ms: u64) -> Result<u8> {
        let idx = self.index(channel)?;
        let applied = self.slots[idx]
            .channel
            .set_pwm_duty(duty, &mut self.hw, now_ms)?;
        Ok(applied)
    }

    pub fn set_pwm_duty_percent(&mut self, channel: u8, percent: f32, now_ms: u64) -> Result<u8> {
        let idx = self.index(channel)?;
        let applied = self.slots[idx]
            .channel
            .set_pwm_duty_percent(percent, &mut self.hw, now_ms)?;
        Ok(applied)
    }

    /// Re-program a PWM channel's frequency in place.  The duty is kept.
    pub fn set_pwm_frequency(&mut self, channel: u8, hz: u32, now_ms: u64) -> Result<()> {
        let idx = self.index(channel)?;
        let ch = &mut self.slots[idx].channel;
        match ch.role() {
            Some(Role::Pwm) => {}
            Some(Role::DigitalIn) | None => return Err(RoleConflict::InInput.into()),
            Some(Role::DigitalOut) => return Err(RoleConflict::NotPwm.into()),
        }
        if hz == 0 || hz > pins::PWM_MAX_FREQ_HZ {
            return Err(Error::ConfigurationInvalid("PWM frequency out of range"));
        }
        ch.set_pwm_frequency(hz, &mut self.hw, now_ms).map_err(|e| {
            warn!("ch{}: LEDC refused {}Hz: {}", channel, hz, e);
            Error::ConfigurationInvalid("PWM frequency not achievable")
        })
    }

    // ── Roles ────────────────────────────────────────────────

    /// Switch `channel` to `role`.
    ///
    /// Fails without changing anything while the channel pulses or when
    /// the board row or the line does not allow `role`.  Entering PWM
    /// restores the last duty; if no generator can be used the channel
    /// ends up a digital output (an input where the row forbids output) and
    /// the outcome is [`RoleOutcome::FellBack`].
    pub fn set_role(&mut self, channel: u8, role: Role, now_ms: u64) -> Result<RoleOutcome> {
        let idx = self.index(channel)?;
        let slot = &self.slots[idx];
        if !slot.allowed.contains(role) || !slot.channel.supports(role) {
            warn!("ch{}: {} not allowed", channel, role.as_str());
            return Err(RoleConflict::Unsupported(role).into());
        }
        if slot.channel.is_pulsing() {
            return Err(RoleConflict::PulseActive.into());
        }
        let previous = slot.channel.role();
        if previous == Some(role) {
            return Ok(RoleOutcome::Unchanged);
        }

        if previous == Some(Role::Pwm) {
            self.release_pwm(idx);
        }
        // The generator is reserved before the line leaves its current
        // role, so running out never drives the line through PWM's rest.
        let reserved = if role == Role::Pwm {
            let free = self.pwm.allocate();
            if free.is_none() {
                warn!("ch{}: no PWM generator free", channel);
            }
            free
        } else {
            None
        };

        let outcome = if role == Role::Pwm && reserved.is_none() {
            self.fall_back(idx, now_ms)
        } else {
            if let Err(e) = self.switch_role(idx, role, now_ms) {
                warn!("ch{}: switch to {} failed: {}", channel, role.as_str(), e);
                if let Some(pwm_slot) = reserved {
                    self.pwm.release(pwm_slot);
                }
                if previous == Some(Role::Pwm) {
                    self.attach_or_fall_back(idx, now_ms);
                }
                return Err(e.into());
            }
            match reserved {
                Some(pwm_slot) => self.attach(idx, pwm_slot, now_ms),
                None => RoleOutcome::Switched,
            }
        };

        let slot = &mut self.slots[idx];
        slot.prev_active = slot.channel.is_active();
        if let Some(actual) = slot.channel.role() {
            self.events.push(ChannelEvent::RoleChanged {
                channel,
                role: actual,
                at_ms: now_ms,
            });
            info!("ch{}: role -> {}", channel, actual.as_str());
        }
        Ok(outcome)
    }

    /// Role transition with strap handling.  The strap line is written to
    /// its safe level first; if the driver then refuses the line, the
    /// channel moves to direct register control and retries.
    fn switch_role(&mut self, idx: usize, role: Role, now_ms: u64) -> core::result::Result<(), RoleConflict> {
        let channel = &mut self.slots[idx].channel;
        let strap = channel.caps().strap_safe;
        if let Some(safe) = strap {
            self.hw.write_direct(channel.pin(), safe);
        }
        match channel.set_role(role, &mut self.hw, now_ms) {
            Err(RoleConflict::Unsupported(_)) if strap.is_some() && !channel.is_direct_drive() => {
                warn!(
                    "ch{}: driver refused strap GPIO{}, using direct register control",
                    channel.id(),
                    channel.pin()
                );
                channel.enable_direct_drive();
                channel.set_role(role, &mut self.hw, now_ms)
            }
            other => other,
        }
    }

    fn release_pwm(&mut self, idx: usize) {
        if let Some(slot) = self.slots[idx].channel.detach_pwm(&mut self.hw) {
            self.pwm.release(slot);
        }
    }

    /// Give a PWM-role channel a generator, or demote it to digital output.
    fn attach_or_fall_back(&mut self, idx: usize, now_ms: u64) -> RoleOutcome {
        let Some(pwm_slot) = self.pwm.allocate() else {
            warn!("ch{}: no PWM generator free", self.slots[idx].channel.id());
            return self.fall_back(idx, now_ms);
        };
        self.attach(idx, pwm_slot, now_ms)
    }

    /// Hand an already reserved generator to a PWM-role channel.  The slot
    /// goes back to the pool if the LEDC refuses it.
    fn attach(&mut self, idx: usize, pwm_slot: PwmSlot, now_ms: u64) -> RoleOutcome {
        match self.slots[idx].channel.attach_pwm(pwm_slot, &mut self.hw) {
            Ok(()) => RoleOutcome::Switched,
            Err(e) => {
                self.pwm.release(pwm_slot);
                warn!("ch{}: LEDC setup failed: {}", self.slots[idx].channel.id(), e);
                self.fall_back(idx, now_ms)
            }
        }
    }

    /// Demote to digital output, or to input where the board row or the
    /// line does not allow output.
    fn fall_back(&mut self, idx: usize, now_ms: u64) -> RoleOutcome {
        let slot = &self.slots[idx];
        let id = slot.channel.id();
        let target = if slot.allowed.contains(Role::DigitalOut) && slot.channel.supports(Role::DigitalOut) {
            Role::DigitalOut
        } else {
            Role::DigitalIn
        };
        if let Err(e) = self.switch_role(idx, target, now_ms) {
            error!("ch{}: fallback to {} failed: {}", id, target.as_str(), e);
        }
        self.events.push(ChannelEvent::PwmFallback {
            channel: id,
            at_ms: now_ms,
        });
        RoleOutcome::FellBack(self.slots[idx].channel.role().unwrap_or(target))
    }

    // ── Queries ──────────────────────────────────────────────

    pub fn channel_count(&self) -> u8 {
        self.slots.len() as u8
    }

    pub fn channel(&self, channel: u8) -> Option<&Channel> {
        let idx = self.index(channel).ok()?;
        Some(&self.slots[idx].channel)
    }

    pub fn allowed_roles(&self, channel: u8) -> Option<RoleSet> {
        let idx = self.index(channel).ok()?;
        Some(self.slots[idx].allowed)
    }

    pub fn get_state(&self, channel: u8) -> Option<ChannelState> {
        let ch = self.channel(channel)?;
        Some(ChannelState {
            channel,
            pin: ch.pin(),
            role: ch.role(),
            active: ch.is_active(),
            pulsing: ch.is_pulsing(),
            pulse_ms: ch.pulse_state().map(|p| p.duration_ms),
            pwm_duty: ch.pwm_duty(),
            pwm_freq_hz: ch.pwm_frequency(),
            debounce_ms: ch.settings().debounce_ms,
            direct_drive: ch.is_direct_drive(),
            last_updated_ms: ch.last_change_ms(),
        })
    }

    /// `"ON"`, `"OFF"`, `"PULSING"` or `"PWM <duty>"`.
    pub fn state_string(&self, channel: u8) -> Option<heapless::String<8>> {
        let ch = self.channel(channel)?;
        let mut s = heapless::String::new();
        let res = match ch.pwm_duty() {
            Some(duty) => write!(s, "PWM {}", duty),
            None if ch.is_pulsing() => s.write_str("PULSING"),
            None if ch.is_active() => s.write_str("ON"),
            None => s.write_str("OFF"),
        };
        res.ok()?;
        Some(s)
    }

    pub fn last_updated_ms(&self, channel: u8) -> Option<u64> {
        self.channel(channel).map(Channel::last_change_ms)
    }

    pub fn pwm_generators_free(&self) -> usize {
        self.pwm.available()
    }

    // ── Events ───────────────────────────────────────────────

    pub fn pop_event(&mut self) -> Option<ChannelEvent> {
        self.events.pop()
    }

    pub fn drain_events(&mut self, handler: impl FnMut(ChannelEvent)) {
        self.events.drain(handler);
    }

    pub fn events_dropped(&self) -> u32 {
        self.events.dropped()
    }

    // ── Hardware access ──────────────────────────────────────

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }
}

impl<H: GpioPort + PwmPort> PulseTarget for ChannelSet<H> {
    fn start_pulse(
        &mut self,
        channel: u8,
        duration_ms: u32,
        source: PulseSource,
        now_ms: u64,
    ) -> Result<()> {
        ChannelSet::start_pulse(self, channel, duration_ms, source, now_ms)
    }
}
