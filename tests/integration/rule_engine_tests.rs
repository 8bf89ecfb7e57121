//! Integration tests for the rule engine: cooldown, persistence and
//! per-output failure isolation.

use relaynode::app::ports::{KvStore, PulseSource, PulseTarget};
use relaynode::channel_set::ChannelSet;
use relaynode::config::DeviceConfig;
use relaynode::error::{Error, Result};
use relaynode::rules::{MAX_RULES, Rule, RuleEngine, StateCondition};

use super::mock_hw::{MockIo, MockStore};

/// Accepts every pulse and remembers it.
#[derive(Default)]
struct CountingTarget {
    pulses: Vec<(u8, u32, u64)>,
}

impl PulseTarget for CountingTarget {
    fn start_pulse(&mut self, channel: u8, duration_ms: u32, source: PulseSource, now_ms: u64) -> Result<()> {
        assert_eq!(source, PulseSource::PhysicalInput);
        self.pulses.push((channel, duration_ms, now_ms));
        Ok(())
    }
}

fn rule(source_mask: u16, output_mask: u16) -> Rule {
    Rule {
        enabled: true,
        source_mask,
        condition: StateCondition::Active,
        output_mask,
        pulse_ms: 100,
        notify_mask: 0,
        cooldown_ms: 0,
    }
}

#[test]
fn cooldown_holds_until_exactly_elapsed() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    engine
        .set_rule(0, Rule { cooldown_ms: 5_000, ..rule(0b1, 0b100_0000) }, &mut store)
        .unwrap();
    let mut target = CountingTarget::default();

    assert_eq!(engine.handle_channel_event(1, true, 0, &mut target).len(), 1);
    assert!(engine.handle_channel_event(1, true, 4_999, &mut target).is_empty());
    assert_eq!(engine.handle_channel_event(1, true, 5_000, &mut target).len(), 1);
    assert_eq!(target.pulses, [(7, 100, 0), (7, 100, 5_000)]);
}

#[test]
fn conditions_and_enable_flag_select_rules() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    engine.set_rule(0, rule(0b1, 0b1_0000), &mut store).unwrap();
    engine
        .set_rule(1, Rule { condition: StateCondition::Inactive, ..rule(0b1, 0b10_0000) }, &mut store)
        .unwrap();
    engine
        .set_rule(2, Rule { enabled: false, ..rule(0b1, 0b100_0000) }, &mut store)
        .unwrap();
    engine
        .set_rule(3, Rule { condition: StateCondition::Any, ..rule(0b10, 0b1000_0000) }, &mut store)
        .unwrap();
    let mut target = CountingTarget::default();

    let fired = engine.handle_channel_event(1, true, 0, &mut target);
    assert_eq!(fired.iter().map(|f| f.rule).collect::<Vec<_>>(), [0]);
    let fired = engine.handle_channel_event(1, false, 10, &mut target);
    assert_eq!(fired.iter().map(|f| f.rule).collect::<Vec<_>>(), [1]);
    let fired = engine.handle_channel_event(2, false, 20, &mut target);
    assert_eq!(fired.iter().map(|f| f.rule).collect::<Vec<_>>(), [3]);
}

#[test]
fn one_refused_output_does_not_stop_the_others() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    // Ch5 and ch6: the second pulse hits the global exclusivity lock.
    engine.set_rule(0, rule(0b1, 0b11_0000), &mut store).unwrap();
    engine.set_rule(1, rule(0b1, 0b100_0000), &mut store).unwrap();
    let mut set = ChannelSet::new(&DeviceConfig::default(), MockIo::new(), 0);

    let fired = engine.handle_channel_event(1, true, 0, &mut set);
    assert_eq!(fired.len(), 2, "second rule still evaluated");
    assert_eq!((fired[0].pulses_started, fired[0].pulses_failed), (1, 1));
    assert_eq!((fired[1].pulses_started, fired[1].pulses_failed), (0, 1));
    assert_eq!(set.pulsing_channel(), Some(5));
}

#[test]
fn failed_attempts_still_start_the_cooldown() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    engine
        .set_rule(0, Rule { cooldown_ms: 1_000, ..rule(0b1, 0b1_0000) }, &mut store)
        .unwrap();
    let mut set = ChannelSet::new(&DeviceConfig::default(), MockIo::new(), 0);
    set.start_pulse(6, 5_000, PulseSource::ApiRequest, 0).unwrap();

    let fired = engine.handle_channel_event(1, true, 100, &mut set);
    assert_eq!(fired[0].pulses_failed, 1);
    assert_eq!(engine.last_trigger_ms(0), Some(100));
    assert!(engine.handle_channel_event(1, true, 500, &mut set).is_empty());
}

#[test]
fn unusable_rules_are_rejected() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    let cases = [
        rule(0, 0b1_0000),
        rule(0b1, 0),
        rule(0b1, 1 << 9),
        Rule { pulse_ms: 0, ..rule(0b1, 0b1_0000) },
    ];
    for r in cases {
        assert!(matches!(
            engine.set_rule(0, r, &mut store),
            Err(Error::ConfigurationInvalid(_))
        ));
    }
    assert!(engine.set_rule(MAX_RULES, rule(0b1, 0b1_0000), &mut store).is_err());
    assert!(store.keys().is_empty(), "nothing persisted");
}

#[test]
fn rules_survive_a_reload() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    let stored = Rule {
        condition: StateCondition::Inactive,
        notify_mask: 0b101,
        cooldown_ms: 750,
        pulse_ms: 3_000,
        ..rule(0b11, 0b1100_0000)
    };
    engine.set_rule(7, stored, &mut store).unwrap();
    engine.set_rule(2, rule(0b1, 0b1_0000), &mut store).unwrap();
    engine.delete_rule(2, &mut store).unwrap();

    assert!(store.keys().iter().all(|k| k.len() <= 15));
    assert!(!store.has_key("r2_en"));

    let mut reloaded = RuleEngine::new(8);
    assert_eq!(reloaded.load_rules(&store), 1);
    assert_eq!(reloaded.get_rule(7), Some(stored));
    assert_eq!(reloaded.get_rule(2), None);
    assert_eq!(reloaded.last_trigger_ms(7), None, "runtime state is not persisted");
}

#[test]
fn storage_failure_leaves_slot_unchanged() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    store.fail_writes = true;
    assert!(engine.set_rule(0, rule(0b1, 0b1_0000), &mut store).is_err());
    assert_eq!(engine.get_rule(0), None);
}

#[test]
fn torn_overwrite_never_loads_a_mixed_rule() {
    let mut store = MockStore::new();
    let mut engine = RuleEngine::new(8);
    let first = rule(0b1, 0b1_0000);
    engine.set_rule(0, first, &mut store).unwrap();

    let second = Rule {
        pulse_ms: 9_000,
        ..rule(0b10, 0b100_0000)
    };
    store.writes_left = Some(2);
    assert!(engine.set_rule(0, second, &mut store).is_err());
    assert_eq!(engine.get_rule(0), Some(first), "running copy untouched");

    let mut reloaded = RuleEngine::new(8);
    assert_eq!(reloaded.load_rules(&store), 0);
    assert_eq!(reloaded.get_rule(0), None);
}
