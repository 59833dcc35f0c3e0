//! Reader driver trait and error types.
//!
//! This module defines:
//! - `ReaderDriver` trait - Interface for pluggable RF front-end drivers
//! - `HalError` enum - Error types for reader operations
//! - `DriverFactory` type alias - Factory function type

use crate::config::DriverConfig;
use nfc_common::config::ConfigError;
use nfc_common::rf::transceiver::Transceiver;
use nfc_discovery::PollError;
use thiserror::Error;

/// Error types for reader operations.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Driver initialization failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Driver not found
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Poll cycle failed in a way the reader cannot continue from
    #[error("Poll failed: {0}")]
    Poll(#[from] PollError),
}

impl From<ConfigError> for HalError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Factory function type for creating driver instances.
pub type DriverFactory = fn() -> Box<dyn ReaderDriver>;

/// Trait defining the interface for reader drivers.
///
/// The reader core manages drivers through this trait; the discovery
/// engine only ever sees the [`Transceiver`] a driver hands out.
///
/// # Lifecycle
///
/// 1. `init()` - Called once before the poll loop starts; switches the field on
/// 2. `transceiver()` - Borrowed once per poll cycle
/// 3. `shutdown()` - Called when the reader core is stopping; switches the field off
pub trait ReaderDriver: Send {
    /// Returns the driver's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Returns the driver's semantic version.
    fn version(&self) -> &'static str;

    /// Initialize the front end.
    ///
    /// # Errors
    /// Return `HalError::InitFailed` if initialization cannot complete.
    fn init(&mut self, config: &DriverConfig) -> Result<(), HalError>;

    /// RF front end of an initialized driver.
    ///
    /// # Errors
    /// `HalError::InitFailed` before `init()` or after `shutdown()`.
    fn transceiver(&mut self) -> Result<&mut dyn Transceiver, HalError>;

    /// Graceful shutdown of the driver.
    fn shutdown(&mut self) -> Result<(), HalError>;
}
