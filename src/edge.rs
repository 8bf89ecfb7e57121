//! Timestamped edge records for the reporting side.
//!
//! The core runs on a monotonic millisecond clock.  [`WallClock`] turns
//! that into UTC once an epoch offset is known (after SNTP), and
//! [`format_iso8601`] renders it.  [`EdgeLog`] keeps the most recent
//! accepted input edges so a poller can show them without subscribing.

use core::fmt::Write as _;

use chrono::{DateTime, Utc};
use heapless::{Deque, String};

/// Rendered `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub type Iso8601 = String<24>;

/// Edges kept by [`EdgeLog`].
pub const EDGE_LOG_LEN: usize = 16;

/// 9999-12-31T23:59:59.999Z
const LAST_FOUR_DIGIT_YEAR_MS: u64 = 253_402_300_799_999;

/// Monotonic-to-UTC conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock {
    /// Epoch milliseconds at uptime 0.  `None` until time is synced.
    offset_ms: Option<u64>,
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that uptime `uptime_ms` corresponds to `epoch_ms`.
    pub fn sync(&mut self, uptime_ms: u64, epoch_ms: u64) {
        self.offset_ms = Some(epoch_ms.saturating_sub(uptime_ms));
    }

    pub fn is_synced(&self) -> bool {
        self.offset_ms.is_some()
    }

    /// Epoch milliseconds for `uptime_ms`.  Unsynced clocks count from
    /// 1970-01-01, so timestamps stay well-formed and ordered.
    pub fn epoch_ms(&self, uptime_ms: u64) -> u64 {
        self.offset_ms.unwrap_or(0).saturating_add(uptime_ms)
    }

    pub fn timestamp(&self, uptime_ms: u64) -> Iso8601 {
        format_iso8601(self.epoch_ms(uptime_ms))
    }
}

/// Render epoch milliseconds as ISO-8601 UTC.  Instants past the end of
/// year 9999 render as its last millisecond.
pub fn format_iso8601(epoch_ms: u64) -> Iso8601 {
    let ms = epoch_ms.min(LAST_FOUR_DIGIT_YEAR_MS) as i64;
    let at = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
    let mut out = String::new();
    // 24 bytes fit every four-digit year.
    let _ = write!(out, "{}", at.format("%Y-%m-%dT%H:%M:%S%.3fZ"));
    out
}

/// One accepted input edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRecord {
    pub channel: u8,
    pub active: bool,
    pub uptime_ms: u64,
    pub epoch_ms: u64,
}

impl EdgeRecord {
    pub fn timestamp(&self) -> Iso8601 {
        format_iso8601(self.epoch_ms)
    }
}

/// Ring of the last [`EDGE_LOG_LEN`] edges, oldest first.
#[derive(Debug, Default)]
pub struct EdgeLog {
    buf: Deque<EdgeRecord, EDGE_LOG_LEN>,
}

impl EdgeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, clock: &WallClock, channel: u8, active: bool, uptime_ms: u64) -> EdgeRecord {
        let rec = EdgeRecord {
            channel,
            active,
            uptime_ms,
            epoch_ms: clock.epoch_ms(uptime_ms),
        };
        if self.buf.is_full() {
            let _ = self.buf.pop_front();
        }
        let _ = self.buf.push_back(rec);
        rec
    }

    pub fn iter(&self) -> impl Iterator<Item = &EdgeRecord> {
        self.buf.iter()
    }

    /// Most recent edge on `channel`.
    pub fn latest(&self, channel: u8) -> Option<&EdgeRecord> {
        self.buf.iter().rev().find(|r| r.channel == channel)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
