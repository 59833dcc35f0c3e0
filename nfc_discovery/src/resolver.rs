//! Generic collision resolution driver.
//!
//! Steps a [`TechnologyPoller`]'s resolver until the population is
//! enumerated, the device limit is reached or the technology's slot/round
//! budget is used up, and maintains the collision-pending bit.
//!
//! ```text
//! Idle ──start──▶ Probing ──Collision──▶ Resolving
//!                   │  ▲                    │
//!                   │  └──────Found─────────┘
//!                   ├──Complete / FoundLast / limit──▶ Done
//!                   └──Exhausted──▶ Exhausted
//! ```

use crate::error::PollError;
use crate::registry::TargetRegistry;
use crate::tech::{PollContext, ResolveStep, TechnologyPoller};
use nfc_common::discovery::types::Technology;
use nfc_common::rf::transceiver::Transceiver;
use tracing::{debug, info, warn};

/// Upper bound on resolver steps for one resolution.
///
/// Far above what any technology needs (Type A: 3 levels x 32 bits per tag,
/// Type V: 16 slots per mask); hitting it means a poller does not converge.
pub const MAX_RESOLVE_STEPS: usize = 8192;

/// Resolver FSM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ResolverState {
    #[default]
    Idle = 0,
    /// Probing for the next responder.
    Probing = 1,
    /// Narrowing a collision.
    Resolving = 2,
    /// Budget used up with collisions left.
    Exhausted = 3,
    /// Population enumerated or device limit reached.
    Done = 4,
}

/// Outcome of one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub tech: Technology,
    /// Tags in the registry afterwards.
    pub resolved: usize,
    /// Tags may remain beyond what was enumerated.
    pub pending: bool,
    /// The slot/round budget ran out before collisions cleared.
    pub exhausted: bool,
}

/// Drives one technology's resolver FSM to completion.
#[derive(Debug, Default)]
pub struct ResolverDriver {
    state: ResolverState,
    steps: usize,
}

impl ResolverDriver {
    pub const fn new() -> Self {
        Self {
            state: ResolverState::Idle,
            steps: 0,
        }
    }

    #[inline]
    pub const fn state(&self) -> ResolverState {
        self.state
    }

    /// Steps taken by the last run.
    #[inline]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// Resolve `poller`'s population into `registry`.
    ///
    /// The technology's pending bit is cleared on entry and set again when
    /// the device limit stopped the resolution with tags left over.
    ///
    /// # Errors
    /// Any non-collision failure of the poller, verbatim. `Internal` when
    /// the poller does not converge within [`MAX_RESOLVE_STEPS`].
    pub fn run(
        &mut self,
        poller: &mut dyn TechnologyPoller,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
    ) -> Result<Resolution, PollError> {
        let tech = poller.technology();
        ctx.set_pending(tech, false);
        self.steps = 0;
        self.state = ResolverState::Probing;

        let result = self.drive(poller, pcd, ctx, registry);
        if result.is_err() {
            self.state = ResolverState::Idle;
        }
        let (pending, exhausted) = result?;
        ctx.set_pending(tech, pending);

        let resolution = Resolution {
            tech,
            resolved: registry.len(),
            pending,
            exhausted,
        };
        info!(
            "{tech}: resolved {} tag(s){}{}",
            resolution.resolved,
            if pending { ", more pending" } else { "" },
            if exhausted { ", budget exhausted" } else { "" },
        );
        Ok(resolution)
    }

    fn drive(
        &mut self,
        poller: &mut dyn TechnologyPoller,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
    ) -> Result<(bool, bool), PollError> {
        let tech = poller.technology();
        poller.start_resolution(pcd, ctx)?;

        loop {
            if registry.is_full() {
                let pending = poller.settle_at_limit(pcd, ctx, registry)?;
                debug!("{tech}: device limit {} reached", registry.limit());
                self.state = ResolverState::Done;
                return Ok((pending, false));
            }
            if self.steps >= MAX_RESOLVE_STEPS {
                return Err(PollError::Internal("resolver did not converge"));
            }
            self.steps += 1;

            match poller.resolve_step(pcd, ctx, registry)? {
                ResolveStep::Found | ResolveStep::Continue => {
                    if self.state == ResolverState::Resolving {
                        self.state = ResolverState::Probing;
                    }
                }
                ResolveStep::Collision => self.state = ResolverState::Resolving,
                ResolveStep::FoundLast | ResolveStep::Complete => {
                    // A last find may still have filled the registry.
                    let pending = registry.is_full() && poller.settle_at_limit(pcd, ctx, registry)?;
                    self.state = ResolverState::Done;
                    return Ok((pending, false));
                }
                ResolveStep::Exhausted => {
                    warn!("{tech}: collision budget exhausted");
                    self.state = ResolverState::Exhausted;
                    return Ok((false, true));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DetectedTag, ProtocolMeta, SleepState};
    use crate::tech::{ActivationResult, Detection};
    use crate::testing::ScriptedTransceiver;
    use nfc_common::discovery::config::PollConfig;
    use nfc_common::discovery::types::TechMask;

    /// Poller replaying a fixed list of steps, registering a tag on each find.
    struct Replay {
        steps: Vec<ResolveStep>,
        next_id: u8,
        leftover: bool,
    }

    impl Replay {
        fn new(steps: &[ResolveStep], leftover: bool) -> Self {
            Self {
                steps: steps.iter().rev().copied().collect(),
                next_id: 0,
                leftover,
            }
        }
    }

    impl TechnologyPoller for Replay {
        fn technology(&self) -> Technology {
            Technology::TypeV
        }
        fn reset(&mut self) {}
        fn detect(
            &mut self,
            _: &mut dyn Transceiver,
            _: &mut PollContext<'_>,
        ) -> Result<Detection, PollError> {
            Ok(Detection::None)
        }
        fn start_resolution(
            &mut self,
            _: &mut dyn Transceiver,
            _: &mut PollContext<'_>,
        ) -> Result<(), PollError> {
            Ok(())
        }
        fn resolve_step(
            &mut self,
            _: &mut dyn Transceiver,
            _: &mut PollContext<'_>,
            registry: &mut TargetRegistry,
        ) -> Result<ResolveStep, PollError> {
            let step = self.steps.pop().unwrap_or(ResolveStep::Continue);
            if matches!(step, ResolveStep::Found | ResolveStep::FoundLast) {
                self.next_id += 1;
                let tag = DetectedTag::new(
                    &[self.next_id],
                    ProtocolMeta::TypeV { dsfid: 0 },
                    SleepState::Ready,
                )?;
                registry.push(tag)?;
            }
            Ok(step)
        }
        fn settle_at_limit(
            &mut self,
            _: &mut dyn Transceiver,
            _: &mut PollContext<'_>,
            _: &TargetRegistry,
        ) -> Result<bool, PollError> {
            Ok(self.leftover)
        }
        fn activate(
            &mut self,
            _: &mut dyn Transceiver,
            _: &mut PollContext<'_>,
            _: &mut TargetRegistry,
            _: usize,
        ) -> Result<ActivationResult, PollError> {
            Ok(ActivationResult::DeviceActivated)
        }
        fn deactivate(
            &mut self,
            _: &mut dyn Transceiver,
            _: &mut PollContext<'_>,
            _: &mut TargetRegistry,
            _: usize,
        ) -> Result<(), PollError> {
            Ok(())
        }
    }

    fn run(poller: &mut Replay, limit: usize) -> (ResolverDriver, Result<Resolution, PollError>, TechMask) {
        let cfg = PollConfig::default();
        let mut pending = TechMask::all();
        let mut ctx = PollContext::new(&cfg, &mut pending);
        let mut registry = TargetRegistry::new(Technology::TypeV, limit);
        let mut pcd = ScriptedTransceiver::new();
        let mut driver = ResolverDriver::new();
        let result = driver.run(poller, &mut pcd, &mut ctx, &mut registry);
        (driver, result, pending)
    }

    #[test]
    fn test_complete_clears_pending() {
        use ResolveStep::*;
        let mut poller = Replay::new(&[Collision, Found, Found, Complete], true);
        let (driver, result, pending) = run(&mut poller, 4);
        let resolution = result.unwrap();
        assert_eq!(resolution.resolved, 2);
        assert!(!resolution.pending);
        assert!(!pending.has(Technology::TypeV));
        assert!(pending.has(Technology::TypeA));
        assert_eq!(driver.state(), ResolverState::Done);
    }

    #[test]
    fn test_limit_uses_settle_result() {
        use ResolveStep::*;
        let mut poller = Replay::new(&[Found, Collision, Found, Found], true);
        let (driver, result, pending) = run(&mut poller, 2);
        let resolution = result.unwrap();
        assert_eq!(resolution.resolved, 2);
        assert!(resolution.pending);
        assert!(pending.has(Technology::TypeV));
        assert_eq!(driver.steps(), 3);

        let mut poller = Replay::new(&[Found, FoundLast], false);
        let (_, result, _) = run(&mut poller, 2);
        assert!(!result.unwrap().pending);
    }

    #[test]
    fn test_exhausted() {
        use ResolveStep::*;
        let mut poller = Replay::new(&[Collision, Collision, Exhausted], true);
        let (driver, result, pending) = run(&mut poller, 4);
        let resolution = result.unwrap();
        assert!(resolution.exhausted);
        assert!(!resolution.pending);
        assert!(!pending.has(Technology::TypeV));
        assert_eq!(driver.state(), ResolverState::Exhausted);
    }

    #[test]
    fn test_non_converging_poller_is_internal() {
        let mut poller = Replay::new(&[], false);
        let (driver, result, _) = run(&mut poller, 4);
        assert!(matches!(result, Err(PollError::Internal(_))));
        assert_eq!(driver.steps(), MAX_RESOLVE_STEPS);
        assert_eq!(driver.state(), ResolverState::Idle);
    }
}
