//! ESP32 time adapter.
//!
//! Provides monotonic time and, once SNTP has run, wall-clock time.
//!
//! - **`target_os = "espidf"`** — wraps `esp_timer_get_time()` and
//!   `gettimeofday()`.
//! - **`not(target_os = "espidf")`** — uses `std::time` for host-side
//!   testing and simulation.

/// Anything before 2020-01-01 means SNTP has not run yet.
const EPOCH_2020_SECS: u64 = 1_577_836_800;

/// Time adapter for the ESP32 platform.
pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Milliseconds since the Unix epoch.  `None` until the wall clock has
    /// been set.
    #[cfg(target_os = "espidf")]
    pub fn epoch_ms(&self) -> Option<u64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        let secs = u64::try_from(tv.tv_sec).ok()?;
        if secs < EPOCH_2020_SECS {
            return None;
        }
        Some(secs * 1_000 + tv.tv_usec as u64 / 1_000)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn epoch_ms(&self) -> Option<u64> {
        let since = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        (since.as_secs() >= EPOCH_2020_SECS).then(|| since.as_millis() as u64)
    }
}
