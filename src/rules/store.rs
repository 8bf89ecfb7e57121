//! Rule persistence over the typed key-value store.
//!
//! One key per field per slot: `r{i}_en`, `r{i}_src`, `r{i}_st`,
//! `r{i}_out`, `r{i}_dur`, `r{i}_ntf`, `r{i}_cd`.  The enable key doubles
//! as the presence marker.  Keys are built into a `String<15>` so they can
//! never exceed the store's key limit.

use core::fmt::Write as _;

use heapless::String;

use crate::app::ports::{KvStore, MAX_KEY_LEN, StorageError};

use super::{Rule, StateCondition};

const FIELDS: [&str; 7] = ["en", "src", "st", "out", "dur", "ntf", "cd"];

fn key(index: usize, field: &str) -> Result<String<MAX_KEY_LEN>, StorageError> {
    let mut k = String::new();
    write!(k, "r{}_{}", index, field).map_err(|_| StorageError::KeyTooLong)?;
    Ok(k)
}

fn condition_code(c: StateCondition) -> i32 {
    match c {
        StateCondition::Any => 0,
        StateCondition::Active => 1,
        StateCondition::Inactive => 2,
    }
}

fn condition_from_code(code: i32) -> StateCondition {
    match code {
        1 => StateCondition::Active,
        2 => StateCondition::Inactive,
        _ => StateCondition::Any,
    }
}

pub(super) fn load(store: &impl KvStore, index: usize) -> Option<Rule> {
    let k = |field: &str| key(index, field).ok();
    if !store.has_key(&k("en")?) {
        return None;
    }
    let int = |field: &str| -> Option<i32> { Some(store.get_int(&k(field)?, 0)) };
    Some(Rule {
        enabled: store.get_bool(&k("en")?, false),
        source_mask: int("src")? as u16,
        condition: condition_from_code(int("st")?),
        output_mask: int("out")? as u16,
        pulse_ms: int("dur")?.max(0) as u32,
        notify_mask: int("ntf")? as u8,
        cooldown_ms: int("cd")?.max(0) as u32,
    })
}

pub(super) fn save(store: &mut impl KvStore, index: usize, rule: &Rule) -> Result<(), StorageError> {
    // Drop the marker of any previous rule first: until the new marker
    // lands, the slot loads as empty rather than as a mix of both rules.
    store.remove(&key(index, "en")?)?;
    store.set_int(&key(index, "src")?, i32::from(rule.source_mask))?;
    store.set_int(&key(index, "st")?, condition_code(rule.condition))?;
    store.set_int(&key(index, "out")?, i32::from(rule.output_mask))?;
    store.set_int(&key(index, "dur")?, rule.pulse_ms.min(i32::MAX as u32) as i32)?;
    store.set_int(&key(index, "ntf")?, i32::from(rule.notify_mask))?;
    store.set_int(&key(index, "cd")?, rule.cooldown_ms.min(i32::MAX as u32) as i32)?;
    // Presence marker last.
    store.set_bool(&key(index, "en")?, rule.enabled)
}

pub(super) fn remove(store: &mut impl KvStore, index: usize) -> Result<(), StorageError> {
    // Marker first, for the same reason.
    for field in FIELDS {
        store.remove(&key(index, field)?)?;
    }
    Ok(())
}
