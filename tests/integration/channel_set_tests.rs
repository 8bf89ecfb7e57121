//! Integration tests for the channel set against a recording mock.
//!
//! Covers interlock exclusivity, role-switch safety, PWM clamping and
//! fallback, and strap-line handling write by write.

use embedded_hal::digital::PinState;

use relaynode::app::ports::PulseSource;
use relaynode::channel::{Channel, Pull, Role, RoleSet};
use relaynode::channel_set::{ChannelSet, RoleOutcome};
use relaynode::config::DeviceConfig;
use relaynode::error::{Busy, Error, RoleConflict};
use relaynode::events::ChannelEvent;
use relaynode::pins::BoardProfile;

use super::mock_hw::{HwCall, MockIo};

const GPIO0: i32 = 0;
const GPIO19: i32 = 19;

fn trigger8(io: MockIo) -> ChannelSet<MockIo> {
    ChannelSet::new(&DeviceConfig::default(), io, 0)
}

fn drain(set: &mut ChannelSet<MockIo>) -> Vec<ChannelEvent> {
    let mut out = Vec::new();
    set.drain_events(|e| out.push(e));
    out
}

// ── Pulse exclusivity ─────────────────────────────────────────

#[test]
fn pulse_on_one_output_blocks_every_other_output() {
    let outputs = [5u8, 6, 7, 8];
    for &a in &outputs {
        let mut set = trigger8(MockIo::new());
        set.set_interlock_ms(100);
        set.start_pulse(a, 50, PulseSource::ApiRequest, 0).unwrap();
        for &b in outputs.iter().filter(|&&b| b != a) {
            assert_eq!(
                set.start_pulse(b, 50, PulseSource::ApiRequest, 10),
                Err(Error::InterlockBusy(Busy::PulseActive { channel: a }))
            );
        }
        set.update(50);
        let b = outputs.iter().copied().find(|&b| b != a).unwrap();
        assert!(set.start_pulse(b, 50, PulseSource::ApiRequest, 149).is_err());
        assert!(set.start_pulse(b, 50, PulseSource::ApiRequest, 150).is_ok());
    }
}

#[test]
fn busy_reasons_are_user_facing() {
    let mut set = trigger8(MockIo::new());
    set.set_interlock_ms(200);
    set.start_pulse(5, 10, PulseSource::RemoteCommand, 0).unwrap();
    let busy = set.start_pulse(6, 10, PulseSource::RemoteCommand, 1).unwrap_err();
    assert_eq!(busy.reason(), "Pulse already active");
    set.update(10);
    let cooldown = set.start_pulse(6, 10, PulseSource::RemoteCommand, 11).unwrap_err();
    assert_eq!(cooldown.reason(), "Interlock active");
}

#[test]
fn pulse_drives_active_level_then_idle() {
    let mut set = trigger8(MockIo::new());
    set.start_pulse(5, 300, PulseSource::ApiRequest, 1_000).unwrap();
    assert_eq!(set.hw().level(25), PinState::High);
    set.update(1_299);
    assert_eq!(set.hw().level(25), PinState::High);
    set.update(1_300);
    assert_eq!(set.hw().level(25), PinState::Low);
    assert!(!set.is_any_pulse_active());
}

// ── Role-switch safety ────────────────────────────────────────

#[test]
fn role_switch_during_pulse_changes_nothing() {
    let mut set = trigger8(MockIo::new());
    set.start_pulse(7, 1_000, PulseSource::ApiRequest, 0).unwrap();
    let writes_before = set.hw().calls.len();

    for role in [Role::DigitalIn, Role::Pwm] {
        let r = set.set_role(7, role, 10);
        assert!(r.is_err(), "{:?} must be refused while pulsing", role);
    }
    assert_eq!(
        set.set_role(7, Role::Pwm, 10),
        Err(Error::RoleConflict(RoleConflict::PulseActive))
    );
    assert_eq!(set.hw().calls.len(), writes_before, "no hardware touched");
    assert_eq!(set.channel(7).and_then(Channel::role), Some(Role::DigitalOut));
    assert_eq!(set.pulsing_channel(), Some(7));
    assert_eq!(set.channel(7).and_then(Channel::pulse_state).map(|p| p.duration_ms), Some(1_000));
}

#[test]
fn input_channels_refuse_outputs() {
    let mut set = trigger8(MockIo::new());
    assert_eq!(
        set.set_output(1, true, 0),
        Err(Error::RoleConflict(RoleConflict::InInput))
    );
    assert_eq!(
        set.set_pwm_duty(1, 10, 0),
        Err(Error::RoleConflict(RoleConflict::InInput))
    );
    assert_eq!(set.set_role(3, Role::DigitalOut, 0).unwrap_err().reason(), "Output mode not supported on this trigger");
}

// ── PWM ───────────────────────────────────────────────────────

#[test]
fn pwm_duty_is_clamped_not_rejected() {
    let mut set = trigger8(MockIo::new());
    assert_eq!(set.set_role(6, Role::Pwm, 0), Ok(RoleOutcome::Switched));

    assert_eq!(set.set_pwm_duty(6, -10, 1), Ok(0));
    assert_eq!(set.set_pwm_duty(6, 999, 2), Ok(255));
    assert_eq!(set.set_pwm_duty_percent(6, 150.0, 3), Ok(255));
    assert_eq!(set.set_pwm_duty_percent(6, -5.0, 4), Ok(0));
    assert_eq!(set.set_pwm_duty_percent(6, 50.0, 5), Ok(128));

    assert_eq!(
        set.hw().calls.last(),
        Some(&HwCall::PwmSetDuty { slot: 0, duty: 128 })
    );
    assert_eq!(set.hw().pwm_output(0), Some((26, 5_000, 128)));
}

#[test]
fn pwm_setup_failure_falls_back_to_output() {
    let mut io = MockIo::new();
    io.refuse_pwm();
    let mut set = trigger8(io);
    let free = set.pwm_generators_free();

    assert_eq!(set.set_role(6, Role::Pwm, 5), Ok(RoleOutcome::FellBack(Role::DigitalOut)));
    assert_eq!(set.channel(6).and_then(Channel::role), Some(Role::DigitalOut));
    assert_eq!(set.pwm_generators_free(), free, "slot handed back");
    assert_eq!(set.hw().level(26), PinState::Low, "output idles released");
    assert!(drain(&mut set).contains(&ChannelEvent::PwmFallback { channel: 6, at_ms: 5 }));

    // Still usable as a pulse output.
    set.start_pulse(6, 10, PulseSource::ApiRequest, 6).unwrap();
}

/// Relay4 with channel 6 (GPIO19) behind an active-low driver.
fn active_low_pwm_config() -> DeviceConfig {
    let mut config = DeviceConfig::for_board(BoardProfile::Relay4);
    config.channels[5].active_low = true;
    config
}

#[test]
fn exhausted_pool_never_asserts_active_low_output() {
    let mut config = active_low_pwm_config();
    config.channels[0].allowed = RoleSet::INPUT.with(Role::DigitalOut).with(Role::Pwm);
    config.channels[0].role = Role::Pwm;
    for ch in &mut config.channels[2..5] {
        ch.allowed = RoleSet::OUTPUT.with(Role::Pwm);
        ch.role = Role::Pwm;
    }
    assert_eq!(config.validate(), Ok(()));
    let mut set = ChannelSet::new(&config, MockIo::new(), 0);
    assert_eq!(set.pwm_generators_free(), 0);

    assert_eq!(set.set_role(6, Role::Pwm, 10), Ok(RoleOutcome::FellBack(Role::DigitalOut)));
    assert_eq!(set.channel(6).and_then(Channel::role), Some(Role::DigitalOut));
    let levels = set.hw().driven_levels(GPIO19);
    assert!(!levels.is_empty());
    assert!(
        levels.iter().all(|&l| l == PinState::High),
        "active-low relay asserted during fallback: {:?}",
        levels
    );
}

#[test]
fn refused_generator_never_asserts_active_low_output() {
    let mut io = MockIo::new();
    io.refuse_pwm();
    let mut set = ChannelSet::new(&active_low_pwm_config(), io, 0);
    let free = set.pwm_generators_free();

    assert_eq!(set.set_role(6, Role::Pwm, 10), Ok(RoleOutcome::FellBack(Role::DigitalOut)));
    assert_eq!(set.pwm_generators_free(), free);
    assert!(set.hw().driven_levels(GPIO19).iter().all(|&l| l == PinState::High));
}

#[test]
fn fallback_respects_board_row_without_output() {
    let mut config = DeviceConfig::default();
    config.channels[5].allowed = RoleSet::INPUT.with(Role::Pwm);
    config.channels[5].role = Role::DigitalIn;
    let mut io = MockIo::new();
    io.refuse_pwm();
    let mut set = ChannelSet::new(&config, io, 0);

    assert_eq!(set.set_role(6, Role::Pwm, 5), Ok(RoleOutcome::FellBack(Role::DigitalIn)));
    assert_eq!(set.channel(6).and_then(Channel::role), Some(Role::DigitalIn));
    assert_eq!(set.start_pulse(6, 10, PulseSource::ApiRequest, 6), Err(Error::RoleConflict(RoleConflict::InInput)));
}

#[test]
fn persisted_pwm_role_restores_duty_at_boot() {
    let mut config = DeviceConfig::default();
    config.channels[6].role = Role::Pwm;
    config.channels[6].pwm_duty = 77;
    config.channels[6].pwm_freq_hz = 1_000;
    let set = ChannelSet::new(&config, MockIo::new(), 0);

    assert_eq!(set.channel(7).and_then(Channel::role), Some(Role::Pwm));
    assert!(set.hw().calls.contains(&HwCall::PwmConfigure {
        slot: 0,
        pin: 27,
        freq_hz: 1_000,
        duty: 77
    }));
    assert_eq!(set.state_string(7).as_deref(), Some("PWM 77"));
}

// ── Strap line ────────────────────────────────────────────────

fn strap_config() -> DeviceConfig {
    let mut config = DeviceConfig::for_board(BoardProfile::Trigger8);
    config.channels[7].allowed = RoleSet::INPUT.with(Role::DigitalOut);
    config
}

#[test]
fn strap_line_never_takes_unsafe_level_across_role_switches() {
    let mut set = ChannelSet::new(&strap_config(), MockIo::new(), 0);
    set.set_role(8, Role::DigitalIn, 10).unwrap();
    set.set_role(8, Role::DigitalOut, 20).unwrap();
    set.set_role(8, Role::DigitalIn, 30).unwrap();
    set.set_role(8, Role::DigitalOut, 40).unwrap();

    let levels = set.hw().driven_levels(GPIO0);
    assert!(!levels.is_empty());
    assert!(
        levels.iter().all(|&l| l == PinState::High),
        "GPIO0 driven low during configure/switch: {:?}",
        levels
    );
    // The very first thing that touches GPIO0 is the safe level.
    assert_eq!(
        set.hw().calls_for(GPIO0).first(),
        Some(&HwCall::WriteDirect { pin: GPIO0, level: PinState::High })
    );
}

#[test]
fn refused_strap_line_uses_register_writes() {
    let mut io = MockIo::new();
    io.refuse_driver(GPIO0);
    let mut set = ChannelSet::new(&DeviceConfig::default(), io, 0);

    assert_eq!(set.channel(8).and_then(Channel::role), Some(Role::DigitalOut));
    assert!(set.channel(8).is_some_and(Channel::is_direct_drive));
    assert!(set.hw().driven_levels(GPIO0).iter().all(|&l| l == PinState::High));

    // Active-low relay: a pulse pulls the line low, release brings it back.
    set.start_pulse(8, 100, PulseSource::ApiRequest, 0).unwrap();
    assert_eq!(set.hw().level(GPIO0), PinState::Low);
    set.update(100);
    assert_eq!(set.hw().level(GPIO0), PinState::High);
    assert!(matches!(
        set.hw().calls.last(),
        Some(HwCall::WriteDirect { pin: GPIO0, level: PinState::High })
    ));
}

#[test]
fn strap_line_with_high_safe_level_refuses_pwm() {
    let mut config = strap_config();
    config.channels[7].allowed = RoleSet::OUTPUT.with(Role::Pwm);
    let mut set = ChannelSet::new(&config, MockIo::new(), 0);
    assert_eq!(
        set.set_role(8, Role::Pwm, 0),
        Err(Error::RoleConflict(RoleConflict::Unsupported(Role::Pwm)))
    );
}

#[test]
fn input_on_strap_line_keeps_wiring_polarity() {
    let mut config = DeviceConfig::for_board(BoardProfile::Relay2);
    config.channels[0].gpio = 15;
    config.channels[0].allowed = RoleSet::INPUT;
    config.channels[0].active_low = false;
    config.channels[0].pull = Pull::None;
    assert_eq!(config.validate(), Ok(()));

    let mut set = ChannelSet::new(&config, MockIo::new(), 0);
    set.hw_mut().set_input(15, PinState::High);
    set.sample(10);
    set.sample(60);
    assert!(set.channel(1).is_some_and(Channel::is_active));
    assert_eq!(
        drain(&mut set),
        vec![ChannelEvent::InputChanged { channel: 1, active: true, at_ms: 60 }]
    );
}

// ── Edges ─────────────────────────────────────────────────────

#[test]
fn chattering_input_reports_nothing() {
    let mut set = trigger8(MockIo::new());
    let mut level = PinState::Low;
    for t in (0..=200).step_by(10) {
        level = !level;
        set.hw_mut().set_input(32, level);
        set.sample(t);
    }
    assert!(drain(&mut set).is_empty());
}
