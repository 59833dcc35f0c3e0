//! Reader core and poll loop management.
//!
//! The `ReaderCore` struct is the main entry point for reader operations.
//! It owns the poll state machine, loads the driver and runs the poll loop,
//! one `PollStateMachine::poll` per cycle.

use crate::config::ReaderConfig;
use crate::driver::{HalError, ReaderDriver};
use crate::driver_registry::DriverRegistry;
use nfc_common::config::ConfigLoader;
use nfc_common::discovery::types::{PollState, Technology};
use nfc_discovery::{DetectedTag, PollError, PollOutcome, PollStateMachine};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Poll loop statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Poll cycles executed
    pub cycles: u64,
    /// Cycles that ended in a non-fatal poll error
    pub errors: u64,
    /// Cycles that activated a tag
    pub activations: u64,
    /// Longest cycle [us]
    pub max_cycle_time_us: u64,
    /// Sum of cycle times for average calculation
    pub total_cycle_time_us: u64,
}

impl PollStats {
    pub fn avg_cycle_time_us(&self) -> u64 {
        self.total_cycle_time_us.checked_div(self.cycles).unwrap_or(0)
    }
}

/// One registry entry in a cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct TagReport {
    pub tech: Technology,
    pub index: usize,
    #[serde(flatten)]
    pub tag: DetectedTag,
}

/// What one poll cycle produced.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Outcome, or `Error(..)` for a poll error
    pub outcome: String,
    #[serde(skip)]
    pub result: Result<PollOutcome, PollError>,
    /// State the next cycle starts in
    pub next_state: PollState,
    /// Technologies with tags left unresolved
    pub pending: Vec<Technology>,
    /// Registry contents after the cycle
    pub tags: Vec<TagReport>,
}

/// Errors the poll loop cannot continue from.
fn is_fatal(err: &PollError) -> bool {
    matches!(err, PollError::Aborted | PollError::Transceiver(_))
}

/// Reader core: driver, poll state machine and the poll loop.
pub struct ReaderCore {
    /// Reader configuration
    config: ReaderConfig,
    /// Discovery engine
    machine: PollStateMachine,
    /// Active driver instance
    driver: Option<Box<dyn ReaderDriver>>,
    /// Running flag for poll loop control
    running: Arc<AtomicBool>,
    /// Cycle period from config
    cycle_time: Duration,
    /// Loop statistics
    stats: PollStats,
}

impl ReaderCore {
    /// Create a reader core for a configuration.
    ///
    /// # Errors
    /// Returns `HalError::ConfigError` if validation fails.
    pub fn new(config: ReaderConfig) -> Result<Self, HalError> {
        config.validate()?;
        let machine = PollStateMachine::new(config.poll.clone())?;
        let cycle_time = Duration::from_millis(config.driver.cycle_time_ms);

        info!(
            "ReaderCore created for '{}' (technologies {:?}, cycle_time={}ms)",
            config.shared.service_name,
            config.poll.enabled,
            config.driver.cycle_time_ms
        );

        Ok(Self {
            config,
            machine,
            driver: None,
            running: Arc::new(AtomicBool::new(false)),
            cycle_time,
            stats: PollStats::default(),
        })
    }

    /// Load a reader configuration file.
    ///
    /// Relative paths inside it are resolved against the file's directory.
    ///
    /// # Errors
    /// Returns `HalError::ConfigError` if the file cannot be read or parsed.
    pub fn load_config(path: &Path) -> Result<ReaderConfig, HalError> {
        info!("Loading configuration from {:?}", path);
        let mut config = ReaderConfig::load(path)
            .map_err(|e| HalError::ConfigError(format!("{}: {e}", path.display())))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Create and initialize a built-in driver by name.
    ///
    /// # Errors
    /// `HalError::DriverNotFound` for an unknown name, or the driver's init error.
    pub fn init(&mut self, driver_name: &str) -> Result<(), HalError> {
        info!("Initializing ReaderCore with driver '{}'...", driver_name);
        let registry = DriverRegistry::with_builtin();
        let driver = registry.create_driver(driver_name)?;
        self.init_with(driver)
    }

    /// Initialize with an already constructed driver.
    pub fn init_with(&mut self, mut driver: Box<dyn ReaderDriver>) -> Result<(), HalError> {
        info!("Created driver: {} v{}", driver.name(), driver.version());
        driver.init(&self.config.driver)?;
        self.driver = Some(driver);
        info!("ReaderCore initialized successfully");
        Ok(())
    }

    /// Run one poll cycle.
    ///
    /// # Errors
    /// `HalError::InitFailed` without a driver; `HalError::Poll` when the
    /// exchange was aborted or the front end failed. Other poll errors are
    /// reported in the cycle report and counted.
    pub fn poll_once(&mut self) -> Result<CycleReport, HalError> {
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| HalError::InitFailed("Driver not initialized".to_string()))?;
        let pcd = driver.transceiver()?;

        let start = Instant::now();
        let result = self.machine.poll(pcd);
        let cycle_time_us = start.elapsed().as_micros() as u64;

        self.stats.cycles += 1;
        self.stats.total_cycle_time_us += cycle_time_us;
        self.stats.max_cycle_time_us = self.stats.max_cycle_time_us.max(cycle_time_us);

        let outcome = match &result {
            Ok(outcome) => {
                if matches!(
                    outcome,
                    PollOutcome::DeviceActivated { .. } | PollOutcome::P2PTargetActivated { .. }
                ) {
                    self.stats.activations += 1;
                }
                outcome.to_string()
            }
            Err(e) if is_fatal(e) => return Err(HalError::Poll(e.clone())),
            Err(e) => {
                self.stats.errors += 1;
                format!("Error({e})")
            }
        };
        debug!("Cycle {}: {} in {}us", self.stats.cycles, outcome, cycle_time_us);
        Ok(self.report(outcome, result))
    }

    fn report(&self, outcome: String, result: Result<PollOutcome, PollError>) -> CycleReport {
        let tags = Technology::ALL
            .into_iter()
            .flat_map(|tech| {
                self.machine
                    .registry(tech)
                    .iter()
                    .enumerate()
                    .map(move |(index, tag)| TagReport {
                        tech,
                        index,
                        tag: tag.clone(),
                    })
            })
            .collect();
        CycleReport {
            cycle: self.stats.cycles,
            outcome,
            result,
            next_state: self.machine.next_state(),
            pending: self.machine.pending().technologies().collect(),
            tags,
        }
    }

    /// Run the poll loop.
    ///
    /// Blocks until the running flag is cleared or `max_cycles` cycles
    /// have run; `observer` sees every cycle report.
    ///
    /// # Errors
    /// Returns the first fatal error.
    pub fn run(
        &mut self,
        max_cycles: Option<u64>,
        mut observer: impl FnMut(&CycleReport),
    ) -> Result<(), HalError> {
        info!(
            "Starting ReaderCore poll loop (cycle_time={}ms)...",
            self.cycle_time.as_millis()
        );
        self.running.store(true, Ordering::SeqCst);
        let mut executed = 0u64;

        while self.running.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();
            let report = self.poll_once()?;
            observer(&report);

            executed += 1;
            if max_cycles.is_some_and(|max| executed >= max) {
                break;
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < self.cycle_time {
                std::thread::sleep(self.cycle_time - elapsed);
            }

            if self.stats.cycles % 100 == 0 {
                debug!(
                    "Poll loop: {} cycles, avg={}us, max={}us, errors={}",
                    self.stats.cycles,
                    self.stats.avg_cycle_time_us(),
                    self.stats.max_cycle_time_us,
                    self.stats.errors
                );
            }
        }

        info!(
            "ReaderCore poll loop stopped after {} cycles ({} activations, {} errors)",
            self.stats.cycles, self.stats.activations, self.stats.errors
        );
        Ok(())
    }

    /// Stop the poll loop and shut the driver down.
    pub fn shutdown(&mut self) -> Result<(), HalError> {
        info!("Shutdown requested");
        self.running.store(false, Ordering::SeqCst);
        if let Some(driver) = self.driver.as_mut() {
            driver.shutdown()?;
        }
        Ok(())
    }

    /// Get the running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn machine(&self) -> &PollStateMachine {
        &self.machine
    }

    /// Host access to the engine between cycles (re-entry state, activation index).
    pub fn machine_mut(&mut self) -> &mut PollStateMachine {
        &mut self.machine
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulationDriver;
    use crate::drivers::simulation::SimulatedField;
    use crate::drivers::simulation::tags::TypeATag;

    fn config() -> ReaderConfig {
        let mut config =
            ReaderConfig::from_toml("[shared]\nservice_name = \"test\"\n[driver]\ncycle_time_ms = 0\n").unwrap();
        config.poll.enabled = vec![Technology::TypeA];
        config
    }

    fn core_with(field: SimulatedField) -> ReaderCore {
        let mut core = ReaderCore::new(config()).unwrap();
        core.init_with(Box::new(SimulationDriver::with_field(field))).unwrap();
        core
    }

    #[test]
    fn test_poll_requires_driver() {
        let mut core = ReaderCore::new(config()).unwrap();
        assert!(matches!(core.poll_once(), Err(HalError::InitFailed(_))));
    }

    #[test]
    fn test_unknown_driver() {
        let mut core = ReaderCore::new(config()).unwrap();
        assert!(matches!(core.init("ethercat"), Err(HalError::DriverNotFound(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.shared.service_name.clear();
        assert!(matches!(ReaderCore::new(config), Err(HalError::ConfigError(_))));
    }

    #[test]
    fn test_single_tag_activated_then_kept() {
        let field = SimulatedField::new().with_tag(TypeATag::new(&[1, 2, 3, 4], 0x0004, 0x00, None).unwrap());
        let mut core = core_with(field);

        let report = core.poll_once().unwrap();
        assert_eq!(
            report.result,
            Ok(PollOutcome::DeviceActivated {
                tech: Technology::TypeA,
                index: 0
            })
        );
        assert_eq!(report.next_state, PollState::Removal);
        assert_eq!(report.tags.len(), 1);
        assert_eq!(report.tags[0].tag.id.as_slice(), &[1, 2, 3, 4]);

        let report = core.poll_once().unwrap();
        assert_eq!(report.result, Ok(PollOutcome::TechDetected(Technology::TypeA.mask())));
        assert_eq!(core.stats().cycles, 2);
        assert_eq!(core.stats().activations, 1);
    }

    #[test]
    fn test_run_stops_after_max_cycles() {
        let mut core = core_with(SimulatedField::new());
        let mut outcomes = Vec::new();
        core.run(Some(3), |report| outcomes.push(report.outcome.clone())).unwrap();
        assert_eq!(outcomes, vec!["NoTechDetected"; 3]);
        core.shutdown().unwrap();
        assert!(!core.running_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn test_report_serializes() {
        let field = SimulatedField::new().with_tag(TypeATag::new(&[1, 2, 3, 4], 0x0004, 0x00, None).unwrap());
        let mut core = core_with(field);
        let report = core.poll_once().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cycle"], 1);
        assert!(json["outcome"].as_str().unwrap().starts_with("DeviceActivated"));
        assert_eq!(json["tags"].as_array().unwrap().len(), 1);
    }
}
