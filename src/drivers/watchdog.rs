//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the node if the poll loop stalls.  The timeout comes from
//! `DeviceConfig::watchdog_timeout_secs`; the loop calls `feed()` once per
//! poll.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::{info, warn};

/// Shortest timeout accepted; anything lower trips during NVS commits.
pub const MIN_TIMEOUT_SECS: u32 = 2;

pub struct Watchdog {
    timeout_secs: u32,
    subscribed: bool,
}

impl Watchdog {
    /// Reconfigure the TWDT and subscribe the calling task.
    pub fn new(timeout_secs: u32) -> Self {
        let timeout_secs = timeout_secs.max(MIN_TIMEOUT_SECS);

        #[cfg(target_os = "espidf")]
        let subscribed = {
            let cfg = esp_task_wdt_config_t {
                timeout_ms: timeout_secs.saturating_mul(1000),
                idle_core_mask: 0,
                trigger_panic: true,
            };
            // SAFETY: cfg outlives the call; called once from the main task.
            let ret = unsafe { esp_task_wdt_reconfigure(&cfg) };
            if ret != ESP_OK {
                warn!("Watchdog: reconfigure returned {} (may already be configured)", ret);
            }
            // SAFETY: null handle subscribes the current task.
            let ret = unsafe { esp_task_wdt_add(core::ptr::null_mut()) };
            if ret != ESP_OK {
                warn!("Watchdog: failed to subscribe ({})", ret);
            }
            ret == ESP_OK
        };

        #[cfg(not(target_os = "espidf"))]
        let subscribed = {
            warn!("Watchdog(sim): not armed");
            false
        };

        if subscribed {
            info!("Watchdog: subscribed ({}s timeout, panic on trigger)", timeout_secs);
        }
        Self { timeout_secs, subscribed }
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    pub fn is_armed(&self) -> bool {
        self.subscribed
    }

    /// Must be called at least once per timeout period.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: the calling task was subscribed in `new`.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }
}
