//! Simulation driver module.
//!
//! This module provides a simulated RF field for development and testing
//! without a physical front end.

mod driver;
mod field;
mod scenario;
pub mod tags;

pub use driver::SimulationDriver;
pub use field::{FieldStats, MIN_INVENTORY_CHUNK, SimTag, SimulatedField};
pub use scenario::{
    I18000p3m3Entry, Scenario, TypeAEntry, TypeBEntry, TypeVEntry, parse_hex,
};

use crate::driver::ReaderDriver;

/// Factory function to create a simulation driver instance.
pub fn create_driver() -> Box<dyn ReaderDriver> {
    Box::new(SimulationDriver::new())
}
