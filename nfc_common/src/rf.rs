//! RF front-end contract.
//!
//! This module contains the frame types, RF status codes and the
//! [`transceiver::Transceiver`] trait implemented by every reader driver.

pub mod transceiver;
pub mod types;
