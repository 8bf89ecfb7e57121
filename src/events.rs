//! Channel event queue.
//!
//! Events are produced by the channel set while it samples inputs, starts
//! pulses and ends them.  They are consumed by the host loop, which hands
//! input changes to the rule engine and forwards everything to the
//! reporting sinks.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ sample()    │────▶│              │     │ RuleEngine   │
//! │ update()    │────▶│  EventQueue  │────▶│ EdgeLog      │
//! │ start_pulse │────▶│  (per set)   │     │ EventSink    │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! The queue is owned by one [`ChannelSet`](crate::channel_set::ChannelSet)
//! instance, so two co-hosted devices never see each other's events.

use heapless::Deque;
use log::warn;

use crate::app::ports::PulseSource;
use crate::channel::Role;

/// Maximum number of pending events.
/// Power of 2 for efficient ring buffer modulo.
pub const EVENT_QUEUE_CAP: usize = 32;

/// Something observable happened on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    // ── Inputs ────────────────────────────────────────────
    /// Debounced input transition that passed the edge cooldown.
    InputChanged { channel: u8, active: bool, at_ms: u64 },

    // ── Pulses ────────────────────────────────────────────
    PulseStarted {
        channel: u8,
        source: PulseSource,
        duration_ms: u32,
        at_ms: u64,
    },
    PulseEnded {
        channel: u8,
        source: PulseSource,
        at_ms: u64,
    },

    // ── Roles ─────────────────────────────────────────────
    RoleChanged { channel: u8, role: Role, at_ms: u64 },
    /// PWM was requested but no generator could be used; the channel is a
    /// plain digital output instead.
    PwmFallback { channel: u8, at_ms: u64 },
}

impl ChannelEvent {
    pub fn channel(&self) -> u8 {
        match *self {
            Self::InputChanged { channel, .. }
            | Self::PulseStarted { channel, .. }
            | Self::PulseEnded { channel, .. }
            | Self::RoleChanged { channel, .. }
            | Self::PwmFallback { channel, .. } => channel,
        }
    }
}

/// Bounded FIFO of [`ChannelEvent`]s.
#[derive(Debug, Default)]
pub struct EventQueue {
    buf: Deque<ChannelEvent, EVENT_QUEUE_CAP>,
    dropped: u32,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event.  Returns `false` if the queue is full (event dropped).
    pub fn push(&mut self, event: ChannelEvent) -> bool {
        if self.buf.push_back(event).is_err() {
            self.dropped = self.dropped.saturating_add(1);
            warn!("event queue full, dropped {:?}", event);
            return false;
        }
        true
    }

    /// Pop the oldest event.
    pub fn pop(&mut self) -> Option<ChannelEvent> {
        self.buf.pop_front()
    }

    /// Drain all pending events into a callback, in FIFO order.
    pub fn drain(&mut self, mut handler: impl FnMut(ChannelEvent)) {
        while let Some(event) = self.pop() {
            handler(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Events lost to a full queue since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
