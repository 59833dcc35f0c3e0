//! # NFC Reader Library
//!
//! Reader core with a pluggable front-end driver architecture. Drivers
//! implement the [`driver::ReaderDriver`] trait and hand the discovery
//! engine a `Transceiver`; the built-in `simulation` driver runs a
//! multi-tag RF field in software.
//!
//! # Module Structure
//!
//! - [`config`] - Reader configuration file
//! - [`core`] - ReaderCore struct, poll loop management
//! - [`driver`] - ReaderDriver trait and errors
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Driver implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      nfc_hal (single crate)                      │
//! │  ┌──────────────────┐  ┌──────────────┐  ┌───────────────────┐   │
//! │  │ PollStateMachine │◄─┤  ReaderCore  │◄─┤  Driver Registry  │   │
//! │  │ (nfc_discovery)  │  │ (poll loop)  │  │                   │   │
//! │  └────────┬─────────┘  └──────┬───────┘  └───────────────────┘   │
//! │           │ &mut dyn Transceiver                                 │
//! │           ▼                   ▼                                  │
//! │  ┌─────────────────────────────────┐                             │
//! │  │  ReaderDriver (trait object)    │──► SimulatedField           │
//! │  └─────────────────────────────────┘                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod driver;
pub mod driver_registry;
pub mod drivers;

// Re-export key types for convenience
pub use crate::config::{DriverConfig, ReaderConfig};
pub use crate::core::{CycleReport, PollStats, ReaderCore, TagReport};
pub use crate::driver::{DriverFactory, HalError, ReaderDriver};
pub use crate::driver_registry::DriverRegistry;
