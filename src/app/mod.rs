//! Application core — pure domain logic, zero I/O.
//!
//! Wires the channel set and rule engine into a single pollable service
//! and exposes the external API.  All interaction with hardware happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable without real peripherals.

pub mod api;
pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
