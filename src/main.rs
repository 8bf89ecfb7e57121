//! RelayNode Firmware — Main Entry Point
//!
//! Hexagonal architecture with a single cooperative poll loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter   LogEventSink   NvsAdapter    Esp32Time      │
//! │  (GPIO + LEDC)     (EventSink)    (Config+KV)   (uptime/SNTP)  │
//! │                    LogNotificationSink                         │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  ChannelSet · RuleEngine · EdgeLog                     │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::mpsc::{self, Receiver};

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use log::{info, warn};

use relaynode::adapters::hardware::HardwareAdapter;
use relaynode::adapters::log_sink::{LogEventSink, LogNotificationSink};
use relaynode::adapters::nvs::NvsAdapter;
use relaynode::adapters::time::Esp32TimeAdapter;
use relaynode::app::commands::AppCommand;
use relaynode::app::ports::{ConfigError, ConfigPort};
use relaynode::app::service::AppService;
use relaynode::config::DeviceConfig;
use relaynode::drivers::watchdog::Watchdog;

// ── Serial console ────────────────────────────────────────────
//
// One JSON `AppCommand` per line on UART0, parsed on a helper thread and
// handed to the poll loop, which stays the only owner of the service.

fn spawn_console() -> Result<Receiver<AppCommand>> {
    let (tx, rx) = mpsc::sync_channel(4);
    std::thread::Builder::new()
        .name("console".into())
        .stack_size(6 * 1024)
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { continue };
                match serde_json::from_str::<AppCommand>(line.trim()) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("console: bad command ({})", e),
                }
            }
        })?;
    Ok(rx)
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  RelayNode v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let time = Esp32TimeAdapter::new();

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            NvsAdapter::default()
        }
    };
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS ({:?})", cfg.board);
            cfg
        }
        Err(ConfigError::NotFound) => {
            info!("No stored config, using factory wiring");
            DeviceConfig::default()
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            DeviceConfig::default()
        }
    };
    let poll_ms = config.poll_interval_ms.max(1);
    let watchdog = Watchdog::new(config.watchdog_timeout_secs);

    // ── 3. Bring up channels and rules ────────────────────────
    // Channels are configured before anything else touches the pins so
    // strap lines reach their safe level as early as possible.
    let mut log_sink = LogEventSink::new();
    let mut notifier = LogNotificationSink::new();
    let mut app = AppService::new(config, HardwareAdapter::new(), &nvs, time.uptime_ms());
    app.start(&mut log_sink);

    let console = spawn_console()?;

    info!("System ready. Entering poll loop ({}ms).", poll_ms);

    // ── 4. Poll loop ──────────────────────────────────────────
    loop {
        let now_ms = time.uptime_ms();

        if !app.clock().is_synced() {
            if let Some(epoch_ms) = time.epoch_ms() {
                app.sync_clock(now_ms, epoch_ms);
            }
        }

        app.poll(now_ms, &mut notifier, &mut log_sink);

        while let Ok(cmd) = console.try_recv() {
            let reply = app.handle_command(cmd, &mut nvs, now_ms);
            match serde_json::to_string(&reply) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("console: reply not encodable ({})", e),
            }
        }

        // Config auto-save (5s debounce after last change).
        app.auto_save_if_needed(now_ms, &nvs, &mut log_sink);

        watchdog.feed();
        FreeRtos::delay_ms(poll_ms);
    }
}
