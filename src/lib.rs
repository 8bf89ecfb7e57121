//! RelayNode firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod channel;
pub mod channel_set;
pub mod config;
pub mod edge;
pub mod error;
pub mod events;
pub mod pins;
pub mod rules;

// The ESP-IDF implementations are guarded by cfg attributes inside;
// on the host they fall back to simulation.
pub mod adapters;
pub mod drivers;
