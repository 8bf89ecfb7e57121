//! Hardware adapter — bridges GPIO and LEDC to the domain port traits.
//!
//! Implements [`GpioPort`] and [`PwmPort`].  This is the only module that
//! touches pins.  On espidf targets every call goes through
//! [`crate::drivers::hw_init`]; elsewhere the adapter keeps a small pin
//! simulation so the channel core can be exercised on the host.

use embedded_hal::digital::PinState;

use crate::app::ports::{GpioPort, HwError, PwmPort};
use crate::channel::Pull;
use crate::channel::pwm::PwmSlot;
use crate::drivers::hw_init::{self, HwInitError};

impl From<HwInitError> for HwError {
    fn from(e: HwInitError) -> Self {
        match e {
            HwInitError::InvalidPin(_) => HwError::Unsupported,
            other => HwError::Driver(other.code()),
        }
    }
}

fn is_high(level: PinState) -> bool {
    level == PinState::High
}

/// Concrete adapter for the node's GPIO and LEDC peripherals.
#[derive(Debug)]
pub struct HardwareAdapter {
    #[cfg(not(target_os = "espidf"))]
    sim: sim::PinSim,
}

impl Default for HardwareAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim: sim::PinSim::default(),
        }
    }
}

// ── GpioPort implementation ───────────────────────────────────

#[cfg(target_os = "espidf")]
impl GpioPort for HardwareAdapter {
    fn configure_input(&mut self, pin: i32, pull: Pull) -> Result<(), HwError> {
        Ok(hw_init::gpio_config_input(pin, pull)?)
    }

    fn configure_output(&mut self, pin: i32, initial: PinState) -> Result<(), HwError> {
        Ok(hw_init::gpio_config_output(pin, is_high(initial))?)
    }

    fn write(&mut self, pin: i32, level: PinState) {
        hw_init::gpio_write(pin, is_high(level));
    }

    fn write_direct(&mut self, pin: i32, level: PinState) {
        hw_init::gpio_write_register(pin, is_high(level));
    }

    fn read(&self, pin: i32) -> PinState {
        PinState::from(hw_init::gpio_read(pin))
    }
}

// ── PwmPort implementation ────────────────────────────────────

#[cfg(target_os = "espidf")]
impl PwmPort for HardwareAdapter {
    fn pwm_configure(&mut self, slot: PwmSlot, pin: i32, freq_hz: u32, duty: u8) -> Result<(), HwError> {
        Ok(hw_init::ledc_slot_configure(slot.index(), pin, freq_hz, duty)?)
    }

    fn pwm_set_duty(&mut self, slot: PwmSlot, duty: u8) {
        hw_init::ledc_slot_set_duty(slot.index(), duty);
    }

    fn pwm_set_frequency(&mut self, slot: PwmSlot, freq_hz: u32) -> Result<(), HwError> {
        Ok(hw_init::ledc_slot_set_freq(slot.index(), freq_hz)?)
    }

    fn pwm_release(&mut self, slot: PwmSlot, pin: i32) {
        hw_init::ledc_slot_stop(slot.index());
        if let Err(e) = hw_init::gpio_config_output(pin, false) {
            log::warn!("hardware: GPIO{} not returned to GPIO after PWM: {}", pin, e);
        }
    }
}

// ── Host simulation ───────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod sim {
    use embedded_hal::digital::PinState;

    use crate::pins::{GPIO_COUNT, PWM_GENERATORS};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PwmOutput {
        pub pin: i32,
        pub freq_hz: u32,
        pub duty: u8,
    }

    #[derive(Debug)]
    pub struct PinSim {
        /// Externally applied level per line, read while the line is an input.
        pub inputs: [PinState; GPIO_COUNT as usize],
        /// Output latch per line.
        pub latch: [PinState; GPIO_COUNT as usize],
        /// Bit n set while line n drives its latch.
        pub outputs: u64,
        /// Lines whose GPIO driver call fails.
        pub refused: u64,
        pub pwm: [Option<PwmOutput>; PWM_GENERATORS],
    }

    impl Default for PinSim {
        fn default() -> Self {
            Self {
                inputs: [PinState::Low; GPIO_COUNT as usize],
                latch: [PinState::Low; GPIO_COUNT as usize],
                outputs: 0,
                refused: 0,
                pwm: [None; PWM_GENERATORS],
            }
        }
    }

    pub fn index(pin: i32) -> Option<usize> {
        (0..GPIO_COUNT).contains(&pin).then_some(pin as usize)
    }
}

#[cfg(not(target_os = "espidf"))]
pub use sim::PwmOutput;

#[cfg(not(target_os = "espidf"))]
impl HardwareAdapter {
    /// Apply an external level to `pin`.
    pub fn sim_set_input(&mut self, pin: i32, level: PinState) {
        if let Some(i) = sim::index(pin) {
            self.sim.inputs[i] = level;
        }
    }

    /// Make every GPIO driver call on `pin` fail, as the driver does for
    /// reserved strap lines on some boards.
    pub fn sim_refuse_driver(&mut self, pin: i32) {
        if sim::index(pin).is_some() {
            self.sim.refused |= 1 << pin;
        }
    }

    /// Level currently seen on the pad.
    pub fn level(&self, pin: i32) -> PinState {
        self.read(pin)
    }

    pub fn is_output(&self, pin: i32) -> bool {
        sim::index(pin).is_some_and(|_| self.sim.outputs & (1 << pin) != 0)
    }

    pub fn pwm_output(&self, slot: PwmSlot) -> Option<PwmOutput> {
        self.sim.pwm.get(usize::from(slot.index())).copied().flatten()
    }

    fn driver_line(&self, pin: i32) -> Result<usize, HwError> {
        let i = sim::index(pin).ok_or(HwError::Unsupported)?;
        if self.sim.refused & (1 << pin) != 0 {
            return Err(HwError::Driver(-1));
        }
        Ok(i)
    }
}

#[cfg(not(target_os = "espidf"))]
impl GpioPort for HardwareAdapter {
    fn configure_input(&mut self, pin: i32, pull: Pull) -> Result<(), HwError> {
        hw_init::gpio_config_input(pin, pull)?;
        self.driver_line(pin)?;
        self.sim.outputs &= !(1 << pin);
        Ok(())
    }

    fn configure_output(&mut self, pin: i32, initial: PinState) -> Result<(), HwError> {
        hw_init::gpio_config_output(pin, is_high(initial))?;
        let i = self.driver_line(pin)?;
        self.sim.latch[i] = initial;
        self.sim.outputs |= 1 << pin;
        Ok(())
    }

    fn write(&mut self, pin: i32, level: PinState) {
        if let Ok(i) = self.driver_line(pin) {
            self.sim.latch[i] = level;
        }
    }

    fn write_direct(&mut self, pin: i32, level: PinState) {
        if let Some(i) = sim::index(pin) {
            self.sim.latch[i] = level;
            self.sim.outputs |= 1 << pin;
        }
    }

    fn read(&self, pin: i32) -> PinState {
        match sim::index(pin) {
            Some(i) if self.sim.outputs & (1 << pin) != 0 => self.sim.latch[i],
            Some(i) => self.sim.inputs[i],
            None => PinState::Low,
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl PwmPort for HardwareAdapter {
    fn pwm_configure(&mut self, slot: PwmSlot, pin: i32, freq_hz: u32, duty: u8) -> Result<(), HwError> {
        hw_init::ledc_slot_configure(slot.index(), pin, freq_hz, duty)?;
        let entry = self
            .sim
            .pwm
            .get_mut(usize::from(slot.index()))
            .ok_or(HwError::Unsupported)?;
        *entry = Some(PwmOutput { pin, freq_hz, duty });
        Ok(())
    }

    fn pwm_set_duty(&mut self, slot: PwmSlot, duty: u8) {
        if let Some(Some(out)) = self.sim.pwm.get_mut(usize::from(slot.index())) {
            out.duty = duty;
        }
    }

    fn pwm_set_frequency(&mut self, slot: PwmSlot, freq_hz: u32) -> Result<(), HwError> {
        hw_init::ledc_slot_set_freq(slot.index(), freq_hz)?;
        match self.sim.pwm.get_mut(usize::from(slot.index())) {
            Some(Some(out)) => {
                out.freq_hz = freq_hz;
                Ok(())
            }
            _ => Err(HwError::Unsupported),
        }
    }

    fn pwm_release(&mut self, slot: PwmSlot, pin: i32) {
        if let Some(entry) = self.sim.pwm.get_mut(usize::from(slot.index())) {
            *entry = None;
        }
        if let Some(i) = sim::index(pin) {
            self.sim.latch[i] = PinState::Low;
        }
    }
}
