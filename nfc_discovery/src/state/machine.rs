//! Poll loop: Detection → CollisionResolution → Activation → Removal.
//!
//! One [`PollStateMachine::poll`] call starts in the configured next state
//! and runs forward until it has an outcome for the host. Technologies are
//! always handled in priority order A, B, V, 18000p3m3.
//!
//! | Outcome | Next state |
//! |---------|------------|
//! | `NoTechDetected`, `TechDetected`, `CollisionPending`, `NoDeviceResolved` | Detection |
//! | `DevicesResolved` | Activation (`activate_index`) |
//! | `DeviceActivated`, `MergedSelResFound`, `P2PTargetActivated` | Removal |
//! | Removal: tag still present (`TechDetected`) | Removal |

use crate::error::PollError;
use crate::registry::TargetRegistry;
use crate::resolver::{Resolution, ResolverDriver};
use crate::tech::i18000p3m3::I18000p3m3Poller;
use crate::tech::type_a::TypeAPoller;
use crate::tech::type_b::TypeBPoller;
use crate::tech::type_v::TypeVPoller;
use crate::tech::{ActivationResult, Detection, PollContext, TechnologyPoller};
use nfc_common::discovery::config::PollConfig;
use nfc_common::discovery::types::{PollState, TechMask, Technology};
use nfc_common::rf::transceiver::Transceiver;
use nfc_common::rf::types::WaitUnit;
use tracing::{debug, info, warn};

/// Result of one poll invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing answered (or the activated tag left the field).
    NoTechDetected,
    /// Technologies detected and the loop stopped before resolution
    /// (bailout, device limit 0, or the activated tag is still present).
    TechDetected(TechMask),
    /// Several tags of a technology with device limit 0.
    CollisionPending(Technology),
    /// Detection saw tags but resolution enumerated none.
    NoDeviceResolved(Technology),
    /// More than one tag resolved; the host picks one to activate.
    DevicesResolved { tech: Technology, count: usize },
    DeviceActivated { tech: Technology, index: usize },
    /// Type A SAK advertises ISO-DEP and NFC-DEP.
    MergedSelResFound { index: usize },
    /// Type A NFC-DEP target activated.
    P2PTargetActivated { index: usize },
}

impl std::fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTechDetected => write!(f, "NoTechDetected"),
            Self::TechDetected(mask) => {
                write!(f, "TechDetected(")?;
                for (i, tech) in mask.technologies().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{tech}")?;
                }
                write!(f, ")")
            }
            Self::CollisionPending(tech) => write!(f, "CollisionPending({tech})"),
            Self::NoDeviceResolved(tech) => write!(f, "NoDeviceResolved({tech})"),
            Self::DevicesResolved { tech, count } => write!(f, "DevicesResolved({tech}, {count})"),
            Self::DeviceActivated { tech, index } => write!(f, "DeviceActivated({tech}, #{index})"),
            Self::MergedSelResFound { index } => write!(f, "MergedSelResFound(TypeA, #{index})"),
            Self::P2PTargetActivated { index } => write!(f, "P2PTargetActivated(TypeA, #{index})"),
        }
    }
}

/// One poller per technology.
#[derive(Debug, Default)]
struct Pollers {
    type_a: TypeAPoller,
    type_b: TypeBPoller,
    type_v: TypeVPoller,
    i18000p3m3: I18000p3m3Poller,
}

impl Pollers {
    fn get(&mut self, tech: Technology) -> &mut dyn TechnologyPoller {
        match tech {
            Technology::TypeA => &mut self.type_a,
            Technology::TypeB => &mut self.type_b,
            Technology::TypeV => &mut self.type_v,
            Technology::I18000p3m3 => &mut self.i18000p3m3,
        }
    }

    fn reset(&mut self) {
        for tech in Technology::ALL {
            self.get(tech).reset();
        }
    }
}

/// Discovery engine front: owns the registries, the pollers and the
/// detected / collision-pending bitmaps of the current cycle.
#[derive(Debug)]
pub struct PollStateMachine {
    config: PollConfig,
    next_state: PollState,
    pollers: Pollers,
    registries: [TargetRegistry; 4],
    resolver: ResolverDriver,
    detected: TechMask,
    pending: TechMask,
    /// Technology whose registry the next Activation uses.
    resolved: Option<Technology>,
    /// Tag activated last.
    activated: Option<(Technology, usize)>,
}

impl PollStateMachine {
    /// Create a state machine for a validated configuration.
    ///
    /// # Errors
    /// The configuration's validation error.
    pub fn new(config: PollConfig) -> Result<Self, nfc_common::config::ConfigError> {
        config.validate()?;
        let registries = Technology::ALL.map(|tech| TargetRegistry::new(tech, config.device_limit(tech)));
        Ok(Self {
            next_state: config.next_state,
            config,
            pollers: Pollers::default(),
            registries,
            resolver: ResolverDriver::new(),
            detected: TechMask::empty(),
            pending: TechMask::empty(),
            resolved: None,
            activated: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// State the next [`poll`](Self::poll) starts in.
    #[inline]
    pub fn next_state(&self) -> PollState {
        self.next_state
    }

    /// Override the state the next poll starts in.
    pub fn set_next_state(&mut self, state: PollState) {
        self.next_state = state;
    }

    /// Registry index activated by the next Activation phase.
    pub fn set_activate_index(&mut self, index: usize) {
        self.config.activate_index = index;
    }

    /// Re-enter at CollisionResolution with a host-supplied detection bitmap.
    pub fn resume_resolution(&mut self, detected: TechMask) {
        self.detected = detected & self.config.enabled_mask();
        self.next_state = PollState::CollisionResolution;
    }

    /// Technology-detected bitmap of the current cycle.
    #[inline]
    pub fn detected(&self) -> TechMask {
        self.detected
    }

    /// Collision-pending bitmap of the last poll.
    #[inline]
    pub fn pending(&self) -> TechMask {
        self.pending
    }

    /// Read-only registry snapshot for `tech`.
    #[inline]
    pub fn registry(&self, tech: Technology) -> &TargetRegistry {
        &self.registries[tech as usize]
    }

    /// Tag activated last, if still considered in the field.
    #[inline]
    pub fn activated(&self) -> Option<(Technology, usize)> {
        self.activated
    }

    // ─── Poll loop ──────────────────────────────────────────────────

    /// Run the poll loop from the next state until an outcome is reached.
    ///
    /// # Errors
    /// Protocol, integrity, internal, aborted and transceiver errors surface
    /// verbatim; the next poll then starts with a fresh Detection.
    pub fn poll(&mut self, pcd: &mut dyn Transceiver) -> Result<PollOutcome, PollError> {
        let start = self.next_state;
        debug!("poll: starting in {start:?}");
        self.pending = TechMask::empty();

        let result = match start {
            PollState::Detection => self.run_detection(pcd),
            PollState::CollisionResolution => self.run_resolution(pcd),
            PollState::Activation => self.run_activation(pcd),
            PollState::Removal => self.run_removal(pcd),
        };

        self.next_state = match &result {
            Ok(PollOutcome::DevicesResolved { .. }) => PollState::Activation,
            Ok(
                PollOutcome::DeviceActivated { .. }
                | PollOutcome::MergedSelResFound { .. }
                | PollOutcome::P2PTargetActivated { .. },
            ) => PollState::Removal,
            Ok(PollOutcome::TechDetected(_)) if start == PollState::Removal => PollState::Removal,
            Ok(_) | Err(_) => PollState::Detection,
        };
        match &result {
            Ok(outcome) => info!("poll: {outcome}"),
            Err(e) => warn!("poll: {e}"),
        }
        result
    }

    fn run_detection(&mut self, pcd: &mut dyn Transceiver) -> Result<PollOutcome, PollError> {
        let detected = self.detect_technology(pcd)?;
        if detected.is_empty() {
            return Ok(PollOutcome::NoTechDetected);
        }
        if detected.intersects(self.config.bailout_mask()) {
            return Ok(PollOutcome::TechDetected(detected));
        }
        self.run_resolution(pcd)
    }

    fn run_resolution(&mut self, pcd: &mut dyn Transceiver) -> Result<PollOutcome, PollError> {
        let mut last = None;
        for tech in self.detected.technologies() {
            if self.config.device_limit(tech) == 0 {
                return Ok(if self.pending.has(tech) {
                    PollOutcome::CollisionPending(tech)
                } else {
                    PollOutcome::TechDetected(tech.mask())
                });
            }
            last = Some(tech);
            let resolution = match self.resolve_collisions(pcd, tech) {
                Ok(resolution) => resolution,
                Err(e) if e.is_benign() => {
                    debug!("{tech}: resolution timed out, moving on");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match resolution.resolved {
                0 => continue,
                1 => {
                    self.config.activate_index = 0;
                    return self.run_activation(pcd);
                }
                count => return Ok(PollOutcome::DevicesResolved { tech, count }),
            }
        }
        Ok(match last {
            Some(tech) => PollOutcome::NoDeviceResolved(tech),
            None => PollOutcome::NoTechDetected,
        })
    }

    fn run_activation(&mut self, pcd: &mut dyn Transceiver) -> Result<PollOutcome, PollError> {
        let tech = self
            .resolved
            .ok_or(PollError::Internal("activation without resolved technology"))?;
        let index = self.config.activate_index;
        Ok(match self.activate(pcd, tech, index)? {
            ActivationResult::DeviceActivated => PollOutcome::DeviceActivated { tech, index },
            ActivationResult::MergedSelResFound => PollOutcome::MergedSelResFound { index },
            ActivationResult::P2PTargetActivated => PollOutcome::P2PTargetActivated { index },
        })
    }

    fn run_removal(&mut self, pcd: &mut dyn Transceiver) -> Result<PollOutcome, PollError> {
        let Some((tech, _)) = self.activated else {
            return Ok(PollOutcome::NoTechDetected);
        };
        for attempt in 1..=self.config.removal_attempts {
            self.field_reset(pcd)?;
            let mut ctx = PollContext::new(&self.config, &mut self.pending);
            let poller = self.pollers.get(tech);
            poller.reset();
            match poller.detect(pcd, &mut ctx) {
                Ok(Detection::None) => debug!("{tech}: removal check {attempt}, no answer"),
                Ok(_) => return Ok(PollOutcome::TechDetected(tech.mask())),
                Err(e) if e.is_benign() => {}
                Err(e) => return Err(e),
            }
        }
        info!("{tech}: activated tag left the field");
        self.activated = None;
        self.resolved = None;
        Ok(PollOutcome::NoTechDetected)
    }

    // ─── Phases ─────────────────────────────────────────────────────

    /// Probe every enabled technology once.
    ///
    /// Starts a new cycle: registries, pollers and bitmaps are reset.
    /// Stops early at the first detected technology in the bailout bitmap.
    pub fn detect_technology(&mut self, pcd: &mut dyn Transceiver) -> Result<TechMask, PollError> {
        if self.config.field_reset_on_start {
            self.field_reset(pcd)?;
        }
        for tech in Technology::ALL {
            self.registries[tech as usize].reset(self.config.device_limit(tech));
        }
        self.pollers.reset();
        self.detected = TechMask::empty();
        self.pending = TechMask::empty();
        self.resolved = None;
        self.activated = None;

        let bailout = self.config.bailout_mask();
        for tech in self.config.enabled_mask().technologies() {
            let mut ctx = PollContext::new(&self.config, &mut self.pending);
            let detection = match self.pollers.get(tech).detect(pcd, &mut ctx) {
                Ok(detection) => detection,
                Err(e) if e.is_benign() => Detection::None,
                Err(e) => return Err(e),
            };
            match detection {
                Detection::None => continue,
                Detection::Single => debug!("{tech}: detected"),
                Detection::Collision => {
                    debug!("{tech}: detected with collision");
                    ctx.set_pending(tech, true);
                }
            }
            self.detected.insert(tech.mask());
            if bailout.has(tech) {
                debug!("{tech}: bailout");
                break;
            }
        }
        Ok(self.detected)
    }

    /// Enumerate the tags of one technology into its registry.
    ///
    /// The registry is cleared first; the technology's collision-pending bit
    /// reflects the result.
    pub fn resolve_collisions(
        &mut self,
        pcd: &mut dyn Transceiver,
        tech: Technology,
    ) -> Result<Resolution, PollError> {
        let registry = &mut self.registries[tech as usize];
        registry.reset(self.config.device_limit(tech));
        let mut ctx = PollContext::new(&self.config, &mut self.pending);
        let result = self.resolver.run(self.pollers.get(tech), pcd, &mut ctx, registry);
        self.activated = None;
        self.resolved = match &result {
            Ok(resolution) if resolution.resolved > 0 => Some(tech),
            _ => None,
        };
        result
    }

    /// Activate registry entry `index` of `tech`.
    pub fn activate(
        &mut self,
        pcd: &mut dyn Transceiver,
        tech: Technology,
        index: usize,
    ) -> Result<ActivationResult, PollError> {
        let registry = &mut self.registries[tech as usize];
        if index >= registry.len() {
            return Err(PollError::Internal("activation index outside the registry"));
        }
        let mut ctx = PollContext::new(&self.config, &mut self.pending);
        let result = self.pollers.get(tech).activate(pcd, &mut ctx, registry, index)?;
        self.activated = Some((tech, index));
        Ok(result)
    }

    /// Put registry entry `index` of `tech` to sleep.
    pub fn deactivate(
        &mut self,
        pcd: &mut dyn Transceiver,
        tech: Technology,
        index: usize,
    ) -> Result<(), PollError> {
        let registry = &mut self.registries[tech as usize];
        let mut ctx = PollContext::new(&self.config, &mut self.pending);
        self.pollers.get(tech).deactivate(pcd, &mut ctx, registry, index)?;
        if self.activated == Some((tech, index)) {
            self.activated = None;
        }
        Ok(())
    }

    fn field_reset(&mut self, pcd: &mut dyn Transceiver) -> Result<(), PollError> {
        pcd.field_off()?;
        pcd.wait(WaitUnit::Microseconds, self.config.field_reset_us)?;
        pcd.field_on()?;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
