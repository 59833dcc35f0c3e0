//! Discovery vocabulary and poll configuration.
//!
//! - [`types`] - Technologies, technology bitmaps, modes and poll states
//! - [`config`] - Per-technology and poll-loop configuration

pub mod config;
pub mod types;
