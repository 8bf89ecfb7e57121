//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (HTTP handler,
//! MQTT, serial console) that the [`AppService`](super::service::AppService)
//! interprets and answers with an [`ApiResponse`](super::api::ApiResponse).
//! The enum deserializes from JSON, so a transport only has to parse and
//! forward: `{"pulse":{"channel":7,"durationMs":3000}}`.

use serde::Deserialize;

use crate::channel::Role;
use crate::rules::Rule;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppCommand {
    /// Start a timed pulse on an output channel.
    #[serde(rename_all = "camelCase")]
    Pulse { channel: u8, duration_ms: u32 },

    /// Raw 8-bit duty; out-of-range values are clamped.
    SetPwmDuty { channel: u8, duty: i32 },

    SetPwmDutyPercent { channel: u8, percent: f32 },

    SetPwmFrequency { channel: u8, hz: u32 },

    SetRole { channel: u8, role: Role },

    /// Interlock window in milliseconds (clamped to 0–5000).
    SetInterlock { ms: u32 },

    SetRule { index: u8, rule: Rule },

    DeleteRule { index: u8 },

    /// Persist the current config on the next auto-save check.
    SaveConfig,
}
