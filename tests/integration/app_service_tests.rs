//! Integration tests for the AppService poll pipeline.
//!
//! Input edge → rule engine → pulse → notification, driven entirely
//! through mock adapters.

use embedded_hal::digital::PinState;

use relaynode::app::api::ApiResponse;
use relaynode::app::commands::AppCommand;
use relaynode::app::events::AppEvent;
use relaynode::app::ports::{ConfigPort, PulseSource};
use relaynode::app::service::AppService;
use relaynode::channel::Role;
use relaynode::config::DeviceConfig;
use relaynode::events::ChannelEvent;
use relaynode::rules::{Rule, StateCondition};

use super::mock_hw::{MockIo, MockStore, RecordingNotifier, RecordingSink};

const INPUT1_GPIO: i32 = 32;
const OUTPUT7_GPIO: i32 = 27;

struct Rig {
    app: AppService<MockIo>,
    store: MockStore,
    notifier: RecordingNotifier,
    sink: RecordingSink,
}

impl Rig {
    fn new() -> Self {
        let store = MockStore::new();
        let mut app = AppService::new(DeviceConfig::default(), MockIo::new(), &store, 0);
        let mut sink = RecordingSink::default();
        app.start(&mut sink);
        Self {
            app,
            store,
            notifier: RecordingNotifier::default(),
            sink,
        }
    }

    fn poll(&mut self, now_ms: u64) {
        self.app.poll(now_ms, &mut self.notifier, &mut self.sink);
    }

    fn set_input(&mut self, level: PinState) {
        self.app.channels_mut().hw_mut().set_input(INPUT1_GPIO, level);
    }

    fn channel_events(&self) -> Vec<ChannelEvent> {
        self.sink
            .events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Channel(c) => Some(*c),
                _ => None,
            })
            .collect()
    }
}

fn input1_to_output7() -> Rule {
    Rule {
        enabled: true,
        source_mask: 0b1,
        condition: StateCondition::Active,
        output_mask: 1 << 6,
        pulse_ms: 3_000,
        notify_mask: 0b1,
        cooldown_ms: 0,
    }
}

// ── End-to-end: input 1 → rule 0 → output 7 ──────────────────

#[test]
fn input_edge_pulses_mapped_output_for_exact_duration() {
    let mut rig = Rig::new();
    let r = rig.app.set_rule(0, input1_to_output7(), &mut rig.store);
    assert_eq!(r, ApiResponse::ok());

    rig.set_input(PinState::High);
    rig.poll(10);
    rig.poll(40);
    assert!(!rig.app.channels().is_any_pulse_active(), "still debouncing");
    rig.poll(60);
    assert_eq!(rig.app.channels().pulsing_channel(), Some(7));
    assert_eq!(rig.app.channels().hw().level(OUTPUT7_GPIO), PinState::High);

    rig.poll(1_000);
    rig.poll(3_059);
    assert_eq!(rig.app.state_string(7).as_deref(), Some("PULSING"));
    rig.poll(3_060);
    assert_eq!(rig.app.state_string(7).as_deref(), Some("OFF"));
    assert_eq!(rig.app.channels().hw().level(OUTPUT7_GPIO), PinState::Low);
    rig.poll(10_000);

    let pulses: Vec<_> = rig
        .channel_events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                ChannelEvent::PulseStarted { .. } | ChannelEvent::PulseEnded { .. }
            )
        })
        .collect();
    assert_eq!(
        pulses,
        [
            ChannelEvent::PulseStarted {
                channel: 7,
                source: PulseSource::PhysicalInput,
                duration_ms: 3_000,
                at_ms: 60
            },
            ChannelEvent::PulseEnded {
                channel: 7,
                source: PulseSource::PhysicalInput,
                at_ms: 3_060
            },
        ]
    );

    assert_eq!(rig.notifier.sent.len(), 1);
    assert_eq!(rig.notifier.sent[0].channel, 1);
    assert!(rig.notifier.sent[0].active);
    assert_eq!(rig.notifier.sent[0].timestamp, "1970-01-01T00:00:00.060Z");

    let latest = rig.app.edge_log().latest(1).copied();
    assert_eq!(latest.map(|e| (e.active, e.uptime_ms)), Some((true, 60)));
}

#[test]
fn notification_timestamp_follows_synced_clock() {
    let mut rig = Rig::new();
    rig.app.set_rule(0, input1_to_output7(), &mut rig.store);
    rig.app.sync_clock(0, 1_700_000_000_000);

    rig.set_input(PinState::High);
    rig.poll(0);
    rig.poll(50);
    assert_eq!(rig.notifier.sent[0].timestamp, "2023-11-14T22:13:20.050Z");
}

#[test]
fn release_edge_does_not_fire_active_rule() {
    let mut rig = Rig::new();
    rig.app.set_rule(0, Rule { pulse_ms: 10, ..input1_to_output7() }, &mut rig.store);

    rig.set_input(PinState::High);
    rig.poll(0);
    rig.poll(50);
    rig.poll(60);
    rig.set_input(PinState::Low);
    rig.poll(100);
    rig.poll(150);

    let fired = rig
        .sink
        .events
        .iter()
        .filter(|e| matches!(e, AppEvent::RuleFired(_)))
        .count();
    assert_eq!(fired, 1);
    assert!(rig.channel_events().contains(&ChannelEvent::InputChanged {
        channel: 1,
        active: false,
        at_ms: 150
    }));
}

// ── API surface ───────────────────────────────────────────────

#[test]
fn api_reports_reasons_and_clamped_duty() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.app.start_pulse(1, 100, 0),
        ApiResponse::fail("Trigger is in INPUT mode")
    );
    assert!(rig.app.start_pulse(5, 100, 0).ok);
    assert_eq!(
        rig.app.start_pulse(6, 100, 1),
        ApiResponse::fail("Pulse already active")
    );

    assert!(rig.app.set_role(6, Role::Pwm, 2).ok);
    assert_eq!(rig.app.set_pwm_duty(6, 999, 3).duty, Some(255));
    assert_eq!(rig.app.set_pwm_duty_percent(6, 150.0, 4).duty, Some(255));
    assert_eq!(
        rig.app.set_pwm_duty(5, 10, 5),
        ApiResponse::fail("Trigger is not in PWM mode")
    );
}

#[test]
fn commands_route_to_the_same_api() {
    let mut rig = Rig::new();
    let cmd: AppCommand = serde_json::from_str(r#"{"setInterlock":{"ms":60000}}"#).unwrap();
    assert!(rig.app.handle_command(cmd, &mut rig.store, 0).ok);
    assert_eq!(rig.app.channels().interlock_ms(), 5_000);
    assert_eq!(rig.app.current_config().interlock_ms, 5_000);

    let cmd = AppCommand::SetRule { index: 1, rule: input1_to_output7() };
    assert!(rig.app.handle_command(cmd, &mut rig.store, 0).ok);
    assert_eq!(rig.app.list_rules().len(), 1);
    assert!(rig.app.handle_command(AppCommand::DeleteRule { index: 1 }, &mut rig.store, 0).ok);
    assert!(rig.app.list_rules().is_empty());
}

#[test]
fn pulse_command_is_tagged_remote() {
    let mut rig = Rig::new();
    let cmd: AppCommand = serde_json::from_str(r#"{"pulse":{"channel":5,"durationMs":200}}"#).unwrap();
    assert!(rig.app.handle_command(cmd, &mut rig.store, 0).ok);
    assert_eq!(rig.app.channels().pulse_source(), PulseSource::RemoteCommand);

    rig.app.channels_mut().update(200);
    assert!(rig.app.start_pulse(6, 100, 200).ok);
    assert_eq!(rig.app.channels().pulse_source(), PulseSource::ApiRequest);
}

#[test]
fn channel_states_serialize_for_reporting() {
    let mut rig = Rig::new();
    rig.app.set_role(7, Role::Pwm, 0);
    rig.app.set_pwm_duty(7, 64, 0);
    let states = rig.app.all_channel_states();
    let json = serde_json::to_string(&states[6]).unwrap();
    assert_eq!(
        json,
        r#"{"channel":7,"role":"PWM","active":true,"state":"PWM 64","lastUpdatedAt":"1970-01-01T00:00:00.000Z","pwmDuty":64}"#
    );
}

#[test]
fn pwm_fallback_is_a_notice_not_a_failure() {
    let store = MockStore::new();
    let mut io = MockIo::new();
    io.refuse_pwm();
    let mut app = AppService::new(DeviceConfig::default(), io, &store, 0);

    let reply = app.set_role(6, Role::Pwm, 10);
    assert!(reply.ok);
    assert_eq!(reply.note, Some("No PWM generator available, using OUTPUT"));
    assert_eq!(app.current_config().channel(6).map(|c| c.role), Some(Role::DigitalOut));
}

// ── Config persistence ────────────────────────────────────────

#[test]
fn role_change_is_saved_after_quiet_period() {
    let mut rig = Rig::new();
    rig.app.set_role(6, Role::Pwm, 1_000);
    assert!(!rig.app.auto_save_if_needed(5_999, &rig.store, &mut rig.sink));
    assert!(rig.app.auto_save_if_needed(6_000, &rig.store, &mut rig.sink));
    assert_eq!(*rig.store.saves.borrow(), 1);
    assert!(rig.sink.events.contains(&AppEvent::ConfigSaved));

    let saved = rig.store.load().unwrap();
    assert_eq!(saved.channel(6).map(|c| c.role), Some(Role::Pwm));

    // A rebooted service comes back in the saved role.
    let app = AppService::new(saved, MockIo::new(), &rig.store, 0);
    assert_eq!(app.get_state(6).and_then(|s| s.role), Some(Role::Pwm));
}
