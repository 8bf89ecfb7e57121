//! JSON-shaped payloads for the external API.
//!
//! Transport adapters serialize these with `serde_json`; the core never
//! sees a wire format.

use serde::Serialize;

use crate::channel::Role;
use crate::channel_set::ChannelState;
use crate::edge::Iso8601;
use crate::error::Error;
use crate::rules::Rule;

/// Answer to every mutating API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    /// Applied PWM duty after clamping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duty: Option<u8>,
    /// Informational, non-fatal condition (e.g. a PWM fallback).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self { ok: true, error: None, duty: None, note: None }
    }

    pub fn fail(reason: &'static str) -> Self {
        Self { ok: false, error: Some(reason), duty: None, note: None }
    }

    pub fn with_duty(mut self, duty: u8) -> Self {
        self.duty = Some(duty);
        self
    }

    pub fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }
}

impl<T> From<crate::error::Result<T>> for ApiResponse {
    fn from(r: crate::error::Result<T>) -> Self {
        match r {
            Ok(_) => Self::ok(),
            Err(e) => Self::from(e),
        }
    }
}

impl From<Error> for ApiResponse {
    fn from(e: Error) -> Self {
        Self::fail(e.reason())
    }
}

/// One row of `getAllChannelStates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStateDto {
    pub channel: u8,
    pub role: Option<Role>,
    pub active: bool,
    pub state: heapless::String<8>,
    pub last_updated_at: Iso8601,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwm_duty: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u32>,
}

impl ChannelStateDto {
    /// Only the field that matters for the role is filled in.
    pub fn new(state: &ChannelState, text: heapless::String<8>, last_updated_at: Iso8601) -> Self {
        let (pulse_ms, pwm_duty, debounce_ms) = match state.role {
            Some(Role::DigitalIn) => (None, None, Some(state.debounce_ms)),
            Some(Role::Pwm) => (None, state.pwm_duty, None),
            Some(Role::DigitalOut) => (state.pulse_ms, None, None),
            None => (None, None, None),
        };
        Self {
            channel: state.channel,
            role: state.role,
            active: state.active,
            state: text,
            last_updated_at,
            pulse_ms,
            pwm_duty,
            debounce_ms,
        }
    }
}

/// One occupied rule slot for `listRules`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    pub index: u8,
    pub rule: Rule,
}
