//! Per-technology pollers.
//!
//! Each technology implements [`TechnologyPoller`]: a single-slot probe
//! (`detect`), a resolver stepped by the generic driver in
//! [`crate::resolver`], and activation of one registry entry. Pollers keep
//! only traversal state of their own; the registry and the pending bitmap
//! are passed in by the caller.

pub mod i18000p3m3;
pub mod type_a;
pub mod type_b;
pub mod type_v;

use crate::error::PollError;
use crate::registry::TargetRegistry;
use nfc_common::consts::EMVCO_WAKE_RETRIES;
use nfc_common::discovery::config::PollConfig;
use nfc_common::discovery::types::{OperatingMode, TechMask, Technology};
use nfc_common::rf::transceiver::{RfError, Transceiver};
use nfc_common::rf::types::{RfConfig, TxFrame, WaitUnit};
use tracing::{debug, warn};

/// Outcome of a single-slot probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// No response.
    None,
    /// Exactly one clean response.
    Single,
    /// Several tags answered (or the reply was garbled).
    Collision,
}

/// Outcome of one resolver step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStep {
    /// A tag was registered; others may remain.
    Found,
    /// A tag was registered and nothing else answered alongside it.
    FoundLast,
    /// A collision was observed; narrowing continues.
    Collision,
    /// Nothing registered in this step; call again.
    Continue,
    /// Every responder has been enumerated.
    Complete,
    /// Slot or round budget used up with collisions left.
    Exhausted,
}

/// Result of activating one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationResult {
    /// Tag activated (selected, ISO-DEP, ATTRIB, addressed or handle).
    DeviceActivated,
    /// Type A SAK advertises both ISO-DEP and NFC-DEP; the host decides.
    MergedSelResFound,
    /// NFC-DEP target activated with ATR_REQ.
    P2PTargetActivated,
}

/// Per-call context shared by all pollers.
pub struct PollContext<'a> {
    pub config: &'a PollConfig,
    /// Collision-pending bitmap of the current poll invocation.
    pub pending: &'a mut TechMask,
}

impl<'a> PollContext<'a> {
    pub fn new(config: &'a PollConfig, pending: &'a mut TechMask) -> Self {
        Self { config, pending }
    }

    #[inline]
    pub fn mode(&self) -> OperatingMode {
        self.config.mode
    }

    pub fn set_pending(&mut self, tech: Technology, value: bool) {
        self.pending.assign(tech, value);
    }
}

/// Detect / resolve / activate interface of one RF technology.
///
/// # Contract
///
/// - `detect` applies the technology's RF configuration and guard time
///   itself and never touches a registry.
/// - `start_resolution` is called once before the first `resolve_step` of a
///   resolution; `resolve_step` appends to the registry only while it is
///   not full.
/// - `settle_at_limit` is called when the registry fills up and reports
///   whether untracked tags may remain.
pub trait TechnologyPoller {
    fn technology(&self) -> Technology;

    /// Forget traversal and activation state (field reset, new cycle).
    fn reset(&mut self);

    /// Single-slot probe.
    fn detect(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
    ) -> Result<Detection, PollError>;

    /// Prepare a resolution.
    fn start_resolution(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
    ) -> Result<(), PollError>;

    /// Advance the resolution by one probe.
    fn resolve_step(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
    ) -> Result<ResolveStep, PollError>;

    /// Whether tags beyond the device limit may remain.
    fn settle_at_limit(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &TargetRegistry,
    ) -> Result<bool, PollError>;

    /// Bring registry entry `index` into an activated session.
    fn activate(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<ActivationResult, PollError>;

    /// Put registry entry `index` to sleep (HLTA, HLTB, Stay Quiet).
    fn deactivate(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<(), PollError>;
}

// ─── Shared helpers ─────────────────────────────────────────────────

/// Apply the RF configuration and wait the technology's guard time.
pub(crate) fn prepare_detection(
    pcd: &mut dyn Transceiver,
    config: &PollConfig,
    tech: Technology,
    rf: RfConfig,
) -> Result<(), PollError> {
    pcd.set_config(rf)?;
    let guard = config.guard_time_us(tech);
    if guard > 0 {
        pcd.wait(WaitUnit::Microseconds, guard)?;
    }
    Ok(())
}

/// Run a wake-up exchange, retrying on timeout in EMVCo mode.
pub(crate) fn wake_with_retry<T, F>(
    mode: OperatingMode,
    tech: Technology,
    mut wake: F,
) -> Result<T, RfError>
where
    F: FnMut() -> Result<T, RfError>,
{
    let retries = if mode == OperatingMode::Emvco {
        EMVCO_WAKE_RETRIES
    } else {
        0
    };
    let mut attempt = 0;
    loop {
        match wake() {
            Err(RfError::Timeout) if attempt < retries => {
                attempt += 1;
                warn!("{tech}: wake-up timeout, retry {attempt}/{retries}");
            }
            other => return other,
        }
    }
}

/// Send a frame that expects no reply; a timeout is the success case.
pub(crate) fn send_no_reply(
    pcd: &mut dyn Transceiver,
    tx: &TxFrame<'_>,
) -> Result<(), PollError> {
    match pcd.exchange(tx) {
        Ok(_) | Err(RfError::Timeout) => Ok(()),
        Err(e) => {
            debug!("unexpected reply status to silent command: {e}");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_retry_only_in_emvco() {
        let mut calls = 0;
        let res: Result<(), RfError> = wake_with_retry(OperatingMode::Nfc, Technology::TypeA, || {
            calls += 1;
            Err(RfError::Timeout)
        });
        assert_eq!(res, Err(RfError::Timeout));
        assert_eq!(calls, 1);

        let mut calls = 0;
        let res: Result<(), RfError> =
            wake_with_retry(OperatingMode::Emvco, Technology::TypeA, || {
                calls += 1;
                Err(RfError::Timeout)
            });
        assert_eq!(res, Err(RfError::Timeout));
        assert_eq!(calls, 1 + EMVCO_WAKE_RETRIES as usize);
    }

    #[test]
    fn test_wake_retry_stops_on_answer() {
        let mut calls = 0;
        let res = wake_with_retry(OperatingMode::Emvco, Technology::TypeB, || {
            calls += 1;
            if calls < 2 { Err(RfError::Timeout) } else { Ok(calls) }
        });
        assert_eq!(res, Ok(2));
    }

    #[test]
    fn test_wake_retry_does_not_retry_collisions() {
        let mut calls = 0;
        let res: Result<(), RfError> =
            wake_with_retry(OperatingMode::Emvco, Technology::TypeA, || {
                calls += 1;
                Err(RfError::Crc)
            });
        assert_eq!(res, Err(RfError::Crc));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_context_pending() {
        let config = PollConfig::default();
        let mut pending = TechMask::empty();
        let mut ctx = PollContext::new(&config, &mut pending);
        ctx.set_pending(Technology::TypeV, true);
        assert_eq!(ctx.mode(), OperatingMode::Nfc);
        assert!(ctx.pending.has(Technology::TypeV));
    }
}
