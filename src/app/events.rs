//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, publish over MQTT,
//! push to a websocket.

use crate::events::ChannelEvent;
use crate::pins::BoardProfile;
use crate::rules::RuleFiring;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// Forwarded from the channel set's event queue.
    Channel(ChannelEvent),

    /// A rule matched an input edge.
    RuleFired(RuleFiring),

    /// The service finished bring-up.
    Started {
        board: BoardProfile,
        channels: u8,
        rules: usize,
    },

    /// The device config was written to storage.
    ConfigSaved,
}
