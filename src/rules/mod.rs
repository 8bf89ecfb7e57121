//! Declarative input → output automation.
//!
//! A [`Rule`] maps input-channel events to pulses on output channels and an
//! optional notification.  The [`RuleEngine`] evaluates every enabled rule
//! on each accepted input edge:
//!
//! 1. the edge's channel must be in the rule's source mask,
//! 2. the new state must satisfy the rule's [`StateCondition`],
//! 3. the rule's own cooldown must have elapsed since its last trigger.
//!
//! A matching rule requests a pulse on each output channel.  A refused
//! pulse (interlock busy, wrong role) is logged and evaluation carries on
//! with the next output and the next rule.  The last-trigger time is
//! updated whether or not any pulse started, so cooldown throttles
//! attempts rather than successes.
//!
//! Channel `n` is bit `n - 1` of a mask.

mod store;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{KvStore, PulseSource, PulseTarget};
use crate::error::{Error, Result};

/// Number of rule slots.
pub const MAX_RULES: usize = 8;

/// Which input state a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateCondition {
    #[default]
    Any,
    Active,
    Inactive,
}

impl StateCondition {
    pub fn matches(self, active: bool) -> bool {
        match self {
            Self::Any => true,
            Self::Active => active,
            Self::Inactive => !active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub enabled: bool,
    pub source_mask: u16,
    #[serde(default)]
    pub condition: StateCondition,
    pub output_mask: u16,
    pub pulse_ms: u32,
    #[serde(default)]
    pub notify_mask: u8,
    #[serde(default)]
    pub cooldown_ms: u32,
}

impl Rule {
    /// Whether an edge on `channel` to `active` selects this rule.
    /// Cooldown is the engine's business.
    pub fn matches(&self, channel: u8, active: bool) -> bool {
        self.enabled && mask_has(self.source_mask, channel) && self.condition.matches(active)
    }

    pub fn validate(&self, channel_count: u8) -> Result<()> {
        if self.source_mask == 0 {
            return Err(Error::ConfigurationInvalid("Rule has no source channel"));
        }
        if self.output_mask == 0 {
            return Err(Error::ConfigurationInvalid("Rule has no output channel"));
        }
        let known = if channel_count >= 16 {
            u16::MAX
        } else {
            (1u16 << channel_count) - 1
        };
        if (self.source_mask | self.output_mask) & !known != 0 {
            return Err(Error::ConfigurationInvalid("Rule references unknown channel"));
        }
        if self.pulse_ms == 0 {
            return Err(Error::ConfigurationInvalid("Rule pulse duration must be positive"));
        }
        Ok(())
    }

    pub fn outputs(&self) -> impl Iterator<Item = u8> {
        mask_channels(self.output_mask)
    }

    pub fn sources(&self) -> impl Iterator<Item = u8> {
        mask_channels(self.source_mask)
    }
}

/// Mask bit for 1-based `channel`.
pub fn channel_bit(channel: u8) -> u16 {
    match channel {
        1..=16 => 1 << (channel - 1),
        _ => 0,
    }
}

fn mask_has(mask: u16, channel: u8) -> bool {
    mask & channel_bit(channel) != 0
}

fn mask_channels(mask: u16) -> impl Iterator<Item = u8> {
    (0..16u8).filter(move |b| mask & (1 << b) != 0).map(|b| b + 1)
}

/// Outcome of one rule matching one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleFiring {
    pub rule: u8,
    pub channel: u8,
    pub active: bool,
    pub notify_mask: u8,
    pub pulses_started: u8,
    pub pulses_failed: u8,
    pub at_ms: u64,
}

/// What the notification sink is asked to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub mask: u8,
    pub channel: u8,
    pub active: bool,
    pub at_ms: u64,
}

impl RuleFiring {
    pub fn notification(&self) -> Option<Notification> {
        (self.notify_mask != 0).then_some(Notification {
            mask: self.notify_mask,
            channel: self.channel,
            active: self.active,
            at_ms: self.at_ms,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct RuleSlot {
    rule: Rule,
    /// Runtime only.  `None` until the rule first fires after boot.
    last_trigger_ms: Option<u64>,
}

impl RuleSlot {
    fn cooled(&self, now_ms: u64) -> bool {
        self.last_trigger_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= u64::from(self.rule.cooldown_ms))
    }
}

pub struct RuleEngine {
    slots: [Option<RuleSlot>; MAX_RULES],
    channel_count: u8,
}

impl RuleEngine {
    pub fn new(channel_count: u8) -> Self {
        Self {
            slots: [None; MAX_RULES],
            channel_count,
        }
    }

    /// Load every stored rule.  Rules that no longer validate against
    /// this board are skipped.  Returns the number loaded.
    pub fn load_rules(&mut self, store: &impl KvStore) -> usize {
        let mut loaded = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            *slot = None;
            let Some(rule) = store::load(store, index) else {
                continue;
            };
            if let Err(e) = rule.validate(self.channel_count) {
                warn!("rule {}: stored rule rejected: {}", index, e);
                continue;
            }
            *slot = Some(RuleSlot {
                rule,
                last_trigger_ms: None,
            });
            loaded += 1;
        }
        info!("RuleEngine: {} rules loaded", loaded);
        loaded
    }

    /// Validate, persist and install `rule` at `index`.  Resets its cooldown.
    pub fn set_rule(&mut self, index: usize, rule: Rule, store: &mut impl KvStore) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::ConfigurationInvalid("Rule index out of range"))?;
        rule.validate(self.channel_count)?;
        store::save(store, index, &rule).map_err(|e| {
            warn!("rule {}: store failed: {}", index, e);
            Error::ConfigurationInvalid("Rule could not be stored")
        })?;
        *slot = Some(RuleSlot {
            rule,
            last_trigger_ms: None,
        });
        info!("rule {}: set", index);
        Ok(())
    }

    /// Remove the rule at `index` from memory and storage.  Deleting an
    /// empty slot succeeds.
    pub fn delete_rule(&mut self, index: usize, store: &mut impl KvStore) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::ConfigurationInvalid("Rule index out of range"))?;
        store::remove(store, index).map_err(|e| {
            warn!("rule {}: delete failed: {}", index, e);
            Error::ConfigurationInvalid("Rule could not be deleted")
        })?;
        *slot = None;
        info!("rule {}: deleted", index);
        Ok(())
    }

    pub fn get_rule(&self, index: usize) -> Option<Rule> {
        self.slots.get(index)?.map(|s| s.rule)
    }

    /// Installed rules with their slot index.
    pub fn rules(&self) -> impl Iterator<Item = (usize, &Rule)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, &s.rule)))
    }

    pub fn last_trigger_ms(&self, index: usize) -> Option<u64> {
        self.slots.get(index)?.as_ref()?.last_trigger_ms
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Evaluate all rules for one accepted input edge.
    pub fn handle_channel_event(
        &mut self,
        channel: u8,
        active: bool,
        now_ms: u64,
        target: &mut impl PulseTarget,
    ) -> heapless::Vec<RuleFiring, MAX_RULES> {
        let mut fired = heapless::Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(slot) = slot else { continue };
            if !slot.rule.matches(channel, active) || !slot.cooled(now_ms) {
                continue;
            }

            let mut started = 0u8;
            let mut failed = 0u8;
            for output in slot.rule.outputs() {
                match target.start_pulse(output, slot.rule.pulse_ms, PulseSource::PhysicalInput, now_ms) {
                    Ok(()) => started += 1,
                    Err(e) => {
                        failed += 1;
                        warn!("rule {}: pulse on ch{} refused: {}", index, output, e);
                    }
                }
            }
            slot.last_trigger_ms = Some(now_ms);
            info!(
                "rule {}: fired by ch{}={} ({} started, {} refused)",
                index, channel, active, started, failed
            );

            // Capacity equals the slot count, so this cannot overflow.
            let _ = fired.push(RuleFiring {
                rule: index as u8,
                channel,
                active,
                notify_mask: slot.rule.notify_mask,
                pulses_started: started,
                pulses_failed: failed,
                at_ms: now_ms,
            });
        }
        fired
    }
}
