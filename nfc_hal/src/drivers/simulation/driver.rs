//! Simulation driver implementation.
//!
//! The `SimulationDriver` implements the `ReaderDriver` trait on top of a
//! [`SimulatedField`] built from a scenario file, for development and
//! testing without a physical front end.

use super::field::SimulatedField;
use super::scenario::Scenario;
use crate::config::DriverConfig;
use crate::driver::{HalError, ReaderDriver};
use nfc_common::config::ConfigLoader;
use nfc_common::rf::transceiver::Transceiver;
use tracing::{info, warn};

/// Simulation driver implementing the ReaderDriver trait.
pub struct SimulationDriver {
    /// Driver name
    name: &'static str,
    /// Driver version
    version: &'static str,
    /// Initialized flag
    initialized: bool,
    /// Field handed in before `init()`, used instead of a scenario file
    preset: Option<SimulatedField>,
    /// Active field
    field: Option<SimulatedField>,
}

impl SimulationDriver {
    /// Create a new simulation driver instance.
    pub fn new() -> Self {
        Self {
            name: "simulation",
            version: env!("CARGO_PKG_VERSION"),
            initialized: false,
            preset: None,
            field: None,
        }
    }

    /// Driver that ignores the scenario setting and runs `field`.
    pub fn with_field(field: SimulatedField) -> Self {
        Self {
            preset: Some(field),
            ..Self::new()
        }
    }

    /// Field of an initialized driver.
    pub fn field(&self) -> Option<&SimulatedField> {
        self.field.as_ref()
    }

    /// Mutable field access, e.g. to move tags in and out between cycles.
    pub fn field_mut(&mut self) -> Option<&mut SimulatedField> {
        self.field.as_mut()
    }

    fn load_field(config: &DriverConfig) -> Result<SimulatedField, HalError> {
        let scenario = match &config.scenario {
            Some(path) => Scenario::load(path).map_err(|e| {
                HalError::InitFailed(format!("scenario {}: {e}", path.display()))
            })?,
            None => {
                warn!("No scenario configured, simulating an empty field");
                Scenario::default()
            }
        };
        info!(
            "Scenario: {} Type A, {} Type B, {} Type V, {} ISO18000-3M3 tags",
            scenario.type_a.len(),
            scenario.type_b.len(),
            scenario.type_v.len(),
            scenario.i18000p3m3.len()
        );
        scenario
            .build_field()
            .map_err(|e| HalError::InitFailed(e.to_string()))
    }
}

impl Default for SimulationDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderDriver for SimulationDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn version(&self) -> &'static str {
        self.version
    }

    fn init(&mut self, config: &DriverConfig) -> Result<(), HalError> {
        let mut field = match self.preset.take() {
            Some(field) => field,
            None => Self::load_field(config)?,
        };
        field
            .field_on()
            .map_err(|e| HalError::InitFailed(e.to_string()))?;
        info!("Simulated field on with {} tags", field.tag_count());
        self.field = Some(field);
        self.initialized = true;
        Ok(())
    }

    fn transceiver(&mut self) -> Result<&mut dyn Transceiver, HalError> {
        let not_initialized = || HalError::InitFailed("simulation driver not initialized".to_string());
        if !self.initialized {
            return Err(not_initialized());
        }
        let field = self.field.as_mut().ok_or_else(not_initialized)?;
        Ok(field)
    }

    fn shutdown(&mut self) -> Result<(), HalError> {
        if let Some(field) = self.field.as_mut() {
            field
                .field_off()
                .map_err(|e| HalError::InitFailed(e.to_string()))?;
            let stats = field.stats();
            info!(
                "Simulated field off after {} exchanges, {} inventory rounds",
                stats.exchanges, stats.inventory_rounds
            );
        }
        self.initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::tags::TypeATag;
    use nfc_common::rf::types::{Protocol, RfConfig, TxFrame};
    use std::io::Write;

    #[test]
    fn test_transceiver_requires_init() {
        let mut driver = SimulationDriver::new();
        assert!(matches!(driver.transceiver(), Err(HalError::InitFailed(_))));
        driver.init(&DriverConfig::default()).unwrap();
        assert!(driver.transceiver().is_ok());
        assert_eq!(driver.field().unwrap().tag_count(), 0);
        driver.shutdown().unwrap();
        assert!(driver.transceiver().is_err());
    }

    #[test]
    fn test_init_from_scenario_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[type_a]]\nuid = \"01020304\"").unwrap();
        let config = DriverConfig {
            scenario: Some(file.path().to_path_buf()),
            ..DriverConfig::default()
        };
        let mut driver = SimulationDriver::new();
        driver.init(&config).unwrap();
        assert!(driver.field().unwrap().is_powered());

        let pcd = driver.transceiver().unwrap();
        pcd.set_config(RfConfig::new(Protocol::Iso14443a, 1000)).unwrap();
        let atqa = pcd
            .exchange(&TxFrame::Bits {
                data: &[0x26],
                last_bits: 7,
            })
            .unwrap();
        assert_eq!(atqa.as_slice(), &[0x04, 0x00]);
    }

    #[test]
    fn test_missing_scenario_fails_init() {
        let config = DriverConfig {
            scenario: Some("/nonexistent/field.toml".into()),
            ..DriverConfig::default()
        };
        let mut driver = SimulationDriver::new();
        assert!(matches!(driver.init(&config), Err(HalError::InitFailed(_))));
    }

    #[test]
    fn test_preset_field() {
        let field = SimulatedField::new().with_tag(TypeATag::new(&[1, 2, 3, 4], 4, 0, None).unwrap());
        let mut driver = SimulationDriver::with_field(field);
        driver.init(&DriverConfig::default()).unwrap();
        assert!(driver.field_mut().unwrap().remove_tag(&[1, 2, 3, 4]));
    }
}
