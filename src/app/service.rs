//! Application service — the hexagonal core.
//!
//! [`AppService`] owns the channel set, rule engine, edge log and the live
//! [`DeviceConfig`].  It exposes a clean, hardware-agnostic API.  All I/O
//! flows through port traits, making the entire service testable with
//! mock adapters.
//!
//! ```text
//!    GpioPort ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!     PwmPort ◀── │        AppService         │ ──▶ NotificationSink
//!     KvStore ◀─▶ │ ChannelSet · RuleEngine   │ ◀─▶ ConfigPort
//!                 └──────────────────────────┘
//! ```
//!
//! ## Loop contract
//!
//! The host calls [`AppService::poll`] once per iteration.  `poll` samples
//! inputs (so rule-started pulses begin in the same iteration) before it
//! expires pulses.

use log::{info, warn};

use crate::channel::Role;
use crate::channel_set::{ChannelSet, ChannelState, RoleOutcome};
use crate::config::DeviceConfig;
use crate::edge::{EdgeLog, WallClock};
use crate::events::ChannelEvent;
use crate::rules::{MAX_RULES, Rule, RuleEngine};

use super::api::{ApiResponse, ChannelStateDto, RuleDto};
use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{
    ConfigPort, EventSink, GpioPort, KvStore, NotificationSink, PulseSource, PwmPort,
};

/// Quiet time after the last config change before it is flushed.
pub const AUTO_SAVE_DELAY_MS: u64 = 5_000;

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService<H: GpioPort + PwmPort> {
    channels: ChannelSet<H>,
    rules: RuleEngine,
    edges: EdgeLog,
    clock: WallClock,
    config: DeviceConfig,
    config_dirty: bool,
    dirty_since_ms: u64,
}

impl<H: GpioPort + PwmPort> AppService<H> {
    /// Bring every channel up in its persisted role and load the rules.
    pub fn new(config: DeviceConfig, hw: H, store: &impl KvStore, now_ms: u64) -> Self {
        let channels = ChannelSet::new(&config, hw, now_ms);
        let mut rules = RuleEngine::new(channels.channel_count());
        let loaded = rules.load_rules(store);
        info!(
            "AppService: {:?}, {} channels, {} rules",
            config.board,
            channels.channel_count(),
            loaded
        );
        Self {
            channels,
            rules,
            edges: EdgeLog::new(),
            clock: WallClock::new(),
            config,
            config_dirty: false,
            dirty_since_ms: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&mut self, sink: &mut impl EventSink) {
        sink.emit(&AppEvent::Started {
            board: self.config.board,
            channels: self.channels.channel_count(),
            rules: self.rules.rules().count(),
        });
    }

    /// Anchor the wall clock once SNTP has delivered real time.
    pub fn sync_clock(&mut self, uptime_ms: u64, epoch_ms: u64) {
        if !self.clock.is_synced() {
            info!("AppService: wall clock synced");
        }
        self.clock.sync(uptime_ms, epoch_ms);
    }

    // ── Per-iteration orchestration ───────────────────────────

    /// Run one loop iteration: sample → rules → expire pulses.
    pub fn poll(
        &mut self,
        now_ms: u64,
        notifier: &mut impl NotificationSink,
        sink: &mut impl EventSink,
    ) {
        self.channels.sample(now_ms);
        self.dispatch(notifier, sink);
        self.channels.update(now_ms);
        self.dispatch(notifier, sink);
    }

    /// Drain the channel events, feeding input edges to the rule engine.
    fn dispatch(&mut self, notifier: &mut impl NotificationSink, sink: &mut impl EventSink) {
        while let Some(event) = self.channels.pop_event() {
            sink.emit(&AppEvent::Channel(event));
            let ChannelEvent::InputChanged { channel, active, at_ms } = event else {
                continue;
            };
            self.edges.record(&self.clock, channel, active, at_ms);

            let fired = self
                .rules
                .handle_channel_event(channel, active, at_ms, &mut self.channels);
            for firing in fired {
                sink.emit(&AppEvent::RuleFired(firing));
                if let Some(n) = firing.notification() {
                    let ts = self.clock.timestamp(n.at_ms);
                    notifier.send(n.mask, n.channel, n.active, &ts);
                }
            }
        }
    }

    // ── External API ──────────────────────────────────────────

    pub fn start_pulse(&mut self, channel: u8, duration_ms: u32, now_ms: u64) -> ApiResponse {
        self.pulse_for(channel, duration_ms, PulseSource::ApiRequest, now_ms)
    }

    fn pulse_for(&mut self, channel: u8, duration_ms: u32, source: PulseSource, now_ms: u64) -> ApiResponse {
        let r = self.channels.start_pulse(channel, duration_ms, source, now_ms);
        if let Err(e) = r {
            warn!("API: {} pulse on ch{} refused: {}", source.as_str(), channel, e);
        }
        r.into()
    }

    pub fn set_pwm_duty(&mut self, channel: u8, duty: i32, now_ms: u64) -> ApiResponse {
        let r = self.channels.set_pwm_duty(channel, duty, now_ms);
        self.duty_response(channel, r, now_ms)
    }

    pub fn set_pwm_duty_percent(&mut self, channel: u8, percent: f32, now_ms: u64) -> ApiResponse {
        let r = self.channels.set_pwm_duty_percent(channel, percent, now_ms);
        self.duty_response(channel, r, now_ms)
    }

    fn duty_response(&mut self, channel: u8, r: crate::error::Result<u8>, now_ms: u64) -> ApiResponse {
        match r {
            Ok(duty) => {
                if let Some(cfg) = self.config.channel_mut(channel) {
                    cfg.pwm_duty = duty;
                }
                self.mark_config_dirty(now_ms);
                ApiResponse::ok().with_duty(duty)
            }
            Err(e) => {
                warn!("API: PWM duty on ch{} refused: {}", channel, e);
                e.into()
            }
        }
    }

    pub fn set_pwm_frequency(&mut self, channel: u8, hz: u32, now_ms: u64) -> ApiResponse {
        match self.channels.set_pwm_frequency(channel, hz, now_ms) {
            Ok(()) => {
                if let Some(cfg) = self.config.channel_mut(channel) {
                    cfg.pwm_freq_hz = hz;
                }
                self.mark_config_dirty(now_ms);
                ApiResponse::ok()
            }
            Err(e) => {
                warn!("API: PWM frequency on ch{} refused: {}", channel, e);
                e.into()
            }
        }
    }

    pub fn set_role(&mut self, channel: u8, role: Role, now_ms: u64) -> ApiResponse {
        match self.channels.set_role(channel, role, now_ms) {
            Ok(RoleOutcome::Unchanged) => ApiResponse::ok(),
            Ok(outcome) => {
                let applied = self.channels.channel(channel).and_then(|c| c.role());
                if let (Some(cfg), Some(applied)) = (self.config.channel_mut(channel), applied) {
                    cfg.role = applied;
                }
                self.mark_config_dirty(now_ms);
                match outcome.notice() {
                    Some(notice) => {
                        info!("API: ch{} {}", channel, notice);
                        ApiResponse::ok().with_note(notice.reason())
                    }
                    None => ApiResponse::ok(),
                }
            }
            Err(e) => {
                warn!("API: role {} on ch{} refused: {}", role.as_str(), channel, e);
                e.into()
            }
        }
    }

    /// Returns the applied (clamped) window.
    pub fn set_interlock(&mut self, ms: u32, now_ms: u64) -> u32 {
        let applied = self.channels.set_interlock_ms(ms);
        self.config.interlock_ms = applied;
        self.mark_config_dirty(now_ms);
        applied
    }

    pub fn all_channel_states(&self) -> Vec<ChannelStateDto> {
        (1..=self.channels.channel_count())
            .filter_map(|ch| {
                let state = self.channels.get_state(ch)?;
                let text = self.channels.state_string(ch)?;
                Some(ChannelStateDto::new(
                    &state,
                    text,
                    self.clock.timestamp(state.last_updated_ms),
                ))
            })
            .collect()
    }

    pub fn list_rules(&self) -> Vec<RuleDto> {
        self.rules
            .rules()
            .map(|(index, rule)| RuleDto { index: index as u8, rule: *rule })
            .collect()
    }

    pub fn set_rule(&mut self, index: u8, rule: Rule, store: &mut impl KvStore) -> ApiResponse {
        let r = self.rules.set_rule(usize::from(index), rule, store);
        if let Err(e) = r {
            warn!("API: rule {} rejected: {}", index, e);
        }
        r.into()
    }

    /// Parse a JSON rule body and store it.
    pub fn set_rule_json(&mut self, index: u8, json: &str, store: &mut impl KvStore) -> ApiResponse {
        match serde_json::from_str::<Rule>(json) {
            Ok(rule) => self.set_rule(index, rule, store),
            Err(e) => {
                warn!("API: rule {} body unparseable: {}", index, e);
                ApiResponse::fail("Invalid rule JSON")
            }
        }
    }

    pub fn delete_rule(&mut self, index: u8, store: &mut impl KvStore) -> ApiResponse {
        self.rules.delete_rule(usize::from(index), store).into()
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command (HTTP, MQTT, serial).
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        store: &mut impl KvStore,
        now_ms: u64,
    ) -> ApiResponse {
        match cmd {
            AppCommand::Pulse { channel, duration_ms } => {
                self.pulse_for(channel, duration_ms, PulseSource::RemoteCommand, now_ms)
            }
            AppCommand::SetPwmDuty { channel, duty } => self.set_pwm_duty(channel, duty, now_ms),
            AppCommand::SetPwmDutyPercent { channel, percent } => {
                self.set_pwm_duty_percent(channel, percent, now_ms)
            }
            AppCommand::SetPwmFrequency { channel, hz } => {
                self.set_pwm_frequency(channel, hz, now_ms)
            }
            AppCommand::SetRole { channel, role } => self.set_role(channel, role, now_ms),
            AppCommand::SetInterlock { ms } => {
                self.set_interlock(ms, now_ms);
                ApiResponse::ok()
            }
            AppCommand::SetRule { index, rule } => self.set_rule(index, rule, store),
            AppCommand::DeleteRule { index } => self.delete_rule(index, store),
            AppCommand::SaveConfig => {
                self.config_dirty = true;
                self.dirty_since_ms = now_ms.saturating_sub(AUTO_SAVE_DELAY_MS);
                info!("Explicit config save requested (will flush on next auto-save check)");
                ApiResponse::ok()
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn get_state(&self, channel: u8) -> Option<ChannelState> {
        self.channels.get_state(channel)
    }

    pub fn state_string(&self, channel: u8) -> Option<heapless::String<8>> {
        self.channels.state_string(channel)
    }

    pub fn last_updated_ms(&self, channel: u8) -> Option<u64> {
        self.channels.last_updated_ms(channel)
    }

    pub fn channels(&self) -> &ChannelSet<H> {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelSet<H> {
        &mut self.channels
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn edge_log(&self) -> &EdgeLog {
        &self.edges
    }

    pub fn clock(&self) -> &WallClock {
        &self.clock
    }

    /// Live configuration, including runtime changes not yet saved.
    pub fn current_config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Rule slots available.
    pub fn rule_capacity(&self) -> usize {
        MAX_RULES
    }

    // ── Config dirty-flag management ──────────────────────────

    pub fn mark_config_dirty(&mut self, now_ms: u64) {
        if !self.config_dirty {
            self.config_dirty = true;
            self.dirty_since_ms = now_ms;
        }
    }

    /// Save once the config has been quiet for [`AUTO_SAVE_DELAY_MS`].
    /// Returns `true` if the config was saved.
    pub fn auto_save_if_needed(
        &mut self,
        now_ms: u64,
        storage: &impl ConfigPort,
        sink: &mut impl EventSink,
    ) -> bool {
        if !self.config_dirty || now_ms.saturating_sub(self.dirty_since_ms) < AUTO_SAVE_DELAY_MS {
            return false;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Config auto-saved to NVS");
                sink.emit(&AppEvent::ConfigSaved);
                true
            }
            Err(e) => {
                warn!("Config auto-save failed: {}", e);
                false
            }
        }
    }

    /// Force-save if dirty (call before a planned restart).
    pub fn force_save_if_dirty(&mut self, storage: &impl ConfigPort) {
        if !self.config_dirty {
            return;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Config force-saved");
            }
            Err(e) => {
                warn!("Config force-save failed: {}", e);
            }
        }
    }

    /// Whether the config has unsaved changes.
    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }
}
