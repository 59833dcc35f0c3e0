//! NFC Common Library
//!
//! This crate provides the shared vocabulary of the NFC discovery workspace:
//! technologies and their bitmaps, the transceiver contract every reader
//! driver implements, raw RF frames and statuses, and configuration loading.
//!
//! # Module Structure
//!
//! - [`rf`] - Transceiver trait, frames, RF status and configuration
//! - [`discovery`] - Technologies, bitmaps and poll configuration
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Workspace-wide limits
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use nfc_common::prelude::*;
//!
//! let mask = TechMask::from_technologies([Technology::TypeA, Technology::TypeV]);
//! assert!(mask.contains(TechMask::TYPE_A));
//! ```

pub mod config;
pub mod consts;
pub mod discovery;
pub mod prelude;
pub mod rf;
