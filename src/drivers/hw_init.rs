//! Raw GPIO, LEDC and GPIO-register helpers.
//!
//! Thin wrappers over ESP-IDF sys calls used by
//! [`HardwareAdapter`](crate::adapters::hardware::HardwareAdapter).  Every
//! function has a host stub so the library builds and tests off-target;
//! the host simulation itself lives in the adapter.
//!
//! All calls happen from the single main-loop task.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::{debug, info};

use crate::channel::Pull;

// ── Error type ────────────────────────────────────────────────

/// Errors from peripheral configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
    LedcTimerFailed(i32),
    LedcChannelFailed(i32),
    InvalidPin(i32),
}

impl HwInitError {
    /// ESP-IDF return code, or -1 for a pin rejected before any call.
    pub fn code(&self) -> i32 {
        match *self {
            Self::GpioConfigFailed(rc) | Self::LedcTimerFailed(rc) | Self::LedcChannelFailed(rc) => rc,
            Self::InvalidPin(_) => -1,
        }
    }
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc)  => write!(f, "GPIO config failed (rc={})", rc),
            Self::LedcTimerFailed(rc)   => write!(f, "LEDC timer config failed (rc={})", rc),
            Self::LedcChannelFailed(rc) => write!(f, "LEDC channel config failed (rc={})", rc),
            Self::InvalidPin(pin)       => write!(f, "GPIO{} is not a valid line", pin),
        }
    }
}

fn check_pin(pin: i32) -> Result<(), HwInitError> {
    if (0..crate::pins::GPIO_COUNT).contains(&pin) {
        Ok(())
    } else {
        Err(HwInitError::InvalidPin(pin))
    }
}

// ── GPIO ──────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub fn gpio_config_input(pin: i32, pull: Pull) -> Result<(), HwInitError> {
    check_pin(pin)?;
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pin,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: if pull == Pull::Up {
            gpio_pullup_t_GPIO_PULLUP_ENABLE
        } else {
            gpio_pullup_t_GPIO_PULLUP_DISABLE
        },
        pull_down_en: if pull == Pull::Down {
            gpio_pulldown_t_GPIO_PULLDOWN_ENABLE
        } else {
            gpio_pulldown_t_GPIO_PULLDOWN_DISABLE
        },
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    // SAFETY: main-task only; cfg outlives the call.
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 { return Err(HwInitError::GpioConfigFailed(ret)); }
    debug!("hw_init: GPIO{} input ({:?})", pin, pull);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_config_input(pin: i32, _pull: Pull) -> Result<(), HwInitError> {
    check_pin(pin)
}

/// Latch `high` into the output register, then enable the driver, so the
/// pad never shows the opposite level.
#[cfg(target_os = "espidf")]
pub fn gpio_config_output(pin: i32, high: bool) -> Result<(), HwInitError> {
    check_pin(pin)?;
    // SAFETY: main-task only.  gpio_set_level only touches GPIO_OUT, which
    // is ignored until the output driver is enabled below.
    unsafe { gpio_set_level(pin, u32::from(high)) };
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pin,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 { return Err(HwInitError::GpioConfigFailed(ret)); }
    debug!("hw_init: GPIO{} output, initial {}", pin, u8::from(high));
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_config_output(pin: i32, _high: bool) -> Result<(), HwInitError> {
    check_pin(pin)
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: gpio_set_level writes to an already-configured output pin.
    unsafe { gpio_set_level(pin, u32::from(high)); }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: read-only register access.
    (unsafe { gpio_get_level(pin) }) != 0
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(_pin: i32) -> bool {
    false
}

// ── Direct register access ────────────────────────────────────
//
// ESP32 GPIO matrix, output set/clear and enable registers.  Lines 0–31
// live in the first bank, 32–39 in the second.

#[cfg(target_os = "espidf")]
const GPIO_BASE: usize = 0x3FF4_4000;
#[cfg(target_os = "espidf")]
const GPIO_OUT_W1TS: usize = GPIO_BASE + 0x08;
#[cfg(target_os = "espidf")]
const GPIO_OUT_W1TC: usize = GPIO_BASE + 0x0C;
#[cfg(target_os = "espidf")]
const GPIO_OUT1_W1TS: usize = GPIO_BASE + 0x14;
#[cfg(target_os = "espidf")]
const GPIO_OUT1_W1TC: usize = GPIO_BASE + 0x18;
#[cfg(target_os = "espidf")]
const GPIO_ENABLE_W1TS: usize = GPIO_BASE + 0x24;
#[cfg(target_os = "espidf")]
const GPIO_ENABLE1_W1TS: usize = GPIO_BASE + 0x30;

/// Set the output latch of `pin` and enable its driver with two single
/// register writes.  No driver state is consulted, so this works on
/// lines the GPIO driver refuses.
#[cfg(target_os = "espidf")]
pub fn gpio_write_register(pin: i32, high: bool) {
    if check_pin(pin).is_err() {
        return;
    }
    let (bit, set, clear, enable) = if pin < 32 {
        (1u32 << pin, GPIO_OUT_W1TS, GPIO_OUT_W1TC, GPIO_ENABLE_W1TS)
    } else {
        (1u32 << (pin - 32), GPIO_OUT1_W1TS, GPIO_OUT1_W1TC, GPIO_ENABLE1_W1TS)
    };
    let level_reg = if high { set } else { clear };
    // SAFETY: fixed, aligned MMIO addresses of the ESP32 GPIO peripheral.
    // W1TS/W1TC registers only affect the written bit, so no
    // read-modify-write race exists.
    unsafe {
        core::ptr::write_volatile(level_reg as *mut u32, bit);
        core::ptr::write_volatile(enable as *mut u32, bit);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write_register(_pin: i32, _high: bool) {}

// ── LEDC PWM ─────────────────────────────────────────────────
//
// Slot `n` uses LEDC timer `n` and channel `n`, low-speed mode, 8-bit.

#[cfg(target_os = "espidf")]
pub fn ledc_slot_configure(slot: u8, pin: i32, freq_hz: u32, duty: u8) -> Result<(), HwInitError> {
    check_pin(pin)?;
    let timer = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: u32::from(slot),
        duty_resolution: ledc_timer_bit_t_LEDC_TIMER_8_BIT,
        freq_hz,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    // SAFETY: main-task only; configs outlive the calls.
    let ret = unsafe { ledc_timer_config(&timer) };
    if ret != ESP_OK as i32 { return Err(HwInitError::LedcTimerFailed(ret)); }

    let ret = unsafe {
        ledc_channel_config(&ledc_channel_config_t {
            speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
            channel: u32::from(slot),
            timer_sel: u32::from(slot),
            gpio_num: pin,
            duty: u32::from(duty),
            hpoint: 0,
            ..Default::default()
        })
    };
    if ret != ESP_OK as i32 { return Err(HwInitError::LedcChannelFailed(ret)); }
    info!("hw_init: LEDC slot {} -> GPIO{} @ {}Hz duty {}", slot, pin, freq_hz, duty);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_slot_configure(_slot: u8, pin: i32, _freq_hz: u32, _duty: u8) -> Result<(), HwInitError> {
    check_pin(pin)
}

#[cfg(target_os = "espidf")]
pub fn ledc_slot_set_duty(slot: u8, duty: u8) {
    // SAFETY: channel configured by ledc_slot_configure; main loop only.
    unsafe {
        ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, u32::from(slot), u32::from(duty));
        ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, u32::from(slot));
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_slot_set_duty(_slot: u8, _duty: u8) {}

#[cfg(target_os = "espidf")]
pub fn ledc_slot_set_freq(slot: u8, freq_hz: u32) -> Result<(), HwInitError> {
    // SAFETY: timer configured by ledc_slot_configure; main loop only.
    let ret = unsafe { ledc_set_freq(ledc_mode_t_LEDC_LOW_SPEED_MODE, u32::from(slot), freq_hz) };
    if ret != ESP_OK as i32 { return Err(HwInitError::LedcTimerFailed(ret)); }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_slot_set_freq(_slot: u8, _freq_hz: u32) -> Result<(), HwInitError> {
    Ok(())
}

/// Stop the generator with the pad held low.
#[cfg(target_os = "espidf")]
pub fn ledc_slot_stop(slot: u8) {
    // SAFETY: main loop only.
    unsafe {
        ledc_stop(ledc_mode_t_LEDC_LOW_SPEED_MODE, u32::from(slot), 0);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_slot_stop(_slot: u8) {}
