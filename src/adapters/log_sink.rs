//! Log-based sink adapters.
//!
//! [`LogEventSink`] writes structured application events to the ESP-IDF
//! logger (UART / USB-CDC in production).  [`LogNotificationSink`] stands
//! in for a webhook or push transport until one is configured.  A future
//! MQTT adapter would implement the same traits.

use log::info;

use crate::app::events::AppEvent;
use crate::app::ports::{EventSink, NotificationSink};
use crate::events::ChannelEvent;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Channel(ChannelEvent::InputChanged { channel, active, at_ms }) => {
                info!("INPUT | ch={} active={} t={}ms", channel, active, at_ms);
            }
            AppEvent::Channel(ChannelEvent::PulseStarted {
                channel,
                source,
                duration_ms,
                ..
            }) => {
                info!(
                    "PULSE | ch={} src={} dur={}ms",
                    channel,
                    source.as_str(),
                    duration_ms
                );
            }
            AppEvent::Channel(ChannelEvent::PulseEnded { channel, source, at_ms }) => {
                info!("PULSE | ch={} src={} ended t={}ms", channel, source.as_str(), at_ms);
            }
            AppEvent::Channel(ChannelEvent::RoleChanged { channel, role, .. }) => {
                info!("ROLE  | ch={} -> {}", channel, role.as_str());
            }
            AppEvent::Channel(ChannelEvent::PwmFallback { channel, .. }) => {
                info!("ROLE  | ch={} PWM unavailable, fell back to OUTPUT", channel);
            }
            AppEvent::RuleFired(f) => {
                info!(
                    "RULE  | #{} by ch={} active={} | pulses ok={} refused={} | notify=0b{:08b}",
                    f.rule, f.channel, f.active, f.pulses_started, f.pulses_failed, f.notify_mask
                );
            }
            AppEvent::Started { board, channels, rules } => {
                info!("START | board={:?} channels={} rules={}", board, channels, rules);
            }
            AppEvent::ConfigSaved => {
                info!("CONF  | saved");
            }
        }
    }
}

/// Notification transport that only logs.
#[derive(Debug, Default)]
pub struct LogNotificationSink {
    sent: u32,
}

impl LogNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications handed over since boot.
    pub fn sent(&self) -> u32 {
        self.sent
    }
}

impl NotificationSink for LogNotificationSink {
    fn send(&mut self, mask: u8, channel: u8, active: bool, timestamp: &str) {
        self.sent = self.sent.wrapping_add(1);
        info!(
            "NOTIFY | mask=0b{:08b} ch={} active={} at={}",
            mask, channel, active, timestamp
        );
    }
}
