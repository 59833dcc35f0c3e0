//! ISO14443-3B detection, slotted anticollision and ATTRIB activation.
//!
//! Resolution runs rounds of `2^k` slots, `k` growing from 0 to 4 while
//! collisions remain. The first round uses WUPB, later rounds REQB.

use crate::codec::type_b::{self as codec, AttribParams, Atqb, MAX_SLOT_EXPONENT};
use crate::error::PollError;
use crate::registry::{ActivationData, DetectedTag, ProtocolMeta, SleepState, TargetRegistry};
use crate::tech::{
    ActivationResult, Detection, PollContext, ResolveStep, TechnologyPoller, prepare_detection,
    wake_with_retry,
};
use nfc_common::discovery::types::{ActivityVersion, OperatingMode, Technology};
use nfc_common::rf::transceiver::{RfError, Transceiver};
use nfc_common::rf::types::{Protocol, RfConfig, RxFrame, TxFrame};
use tracing::{debug, info};

/// Frame waiting time for Type B exchanges [us].
const TIMEOUT_US: u32 = 5_000;

fn rf() -> RfConfig {
    RfConfig::new(Protocol::Iso14443b, TIMEOUT_US)
}

fn pupi_of(registry: &TargetRegistry, index: usize) -> Result<[u8; 4], PollError> {
    registry
        .entry(index)?
        .id
        .as_slice()
        .try_into()
        .map_err(|_| PollError::Internal("Type B identifier is not a PUPI"))
}

/// Type B poller state.
#[derive(Debug, Default)]
pub struct TypeBPoller {
    /// Slot-count exponent of the current round.
    k: u8,
    /// Slot last addressed in the current round (0 = round not opened).
    slot: u8,
    /// A slot of the current round collided.
    round_collision: bool,
    /// The next round is the first of this resolution (WUPB).
    first_round: bool,
    /// Tag registered last, halted when the next one is found (Activity 1.1).
    last_found: Option<usize>,
    /// Tag activated with ATTRIB.
    active: Option<usize>,
}

impl TypeBPoller {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> u8 {
        1 << self.k
    }

    fn halt(pcd: &mut dyn Transceiver, registry: &mut TargetRegistry, index: usize) -> Result<(), PollError> {
        let pupi = pupi_of(registry, index)?;
        let rx = pcd.exchange(&TxFrame::Bytes(&codec::hltb(&pupi)))?;
        codec::check_hltb_answer(&rx.data)?;
        let tag = registry.entry_mut(index)?;
        tag.sleep = SleepState::Halted;
        tag.activation = None;
        debug!("TypeB: halted PUPI {pupi:02X?}");
        Ok(())
    }

    /// Open the next slot of the round, or close the round.
    fn next_slot(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &PollContext<'_>,
    ) -> Result<Option<Result<RxFrame, RfError>>, PollError> {
        if self.slot == 0 {
            let wakeup = self.first_round;
            self.first_round = false;
            self.slot = 1;
            let frame = codec::request(ctx.config.type_b.afi, self.k, wakeup)?;
            let reply = if wakeup {
                wake_with_retry(ctx.mode(), Technology::TypeB, || {
                    pcd.exchange(&TxFrame::Bytes(&frame))
                })
            } else {
                pcd.exchange(&TxFrame::Bytes(&frame))
            };
            return Ok(Some(reply));
        }
        if self.slot < self.slots() {
            self.slot += 1;
            let marker = codec::slot_marker(self.slot)?;
            return Ok(Some(pcd.exchange(&TxFrame::Bytes(&marker))));
        }
        Ok(None)
    }
}

impl TechnologyPoller for TypeBPoller {
    fn technology(&self) -> Technology {
        Technology::TypeB
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn detect(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
    ) -> Result<Detection, PollError> {
        prepare_detection(pcd, ctx.config, Technology::TypeB, rf())?;
        self.active = None;
        let frame = codec::request(ctx.config.type_b.afi, 0, ctx.mode() == OperatingMode::Emvco)?;

        match wake_with_retry(ctx.mode(), Technology::TypeB, || {
            pcd.exchange(&TxFrame::Bytes(&frame))
        }) {
            Ok(rx) => {
                Atqb::parse(&rx.data)?;
                Ok(Detection::Single)
            }
            Err(RfError::Timeout) => Ok(Detection::None),
            Err(RfError::Collision(_)) => Ok(Detection::Collision),
            Err(e) if e.is_integrity() => Ok(Detection::Collision),
            Err(e) => Err(e.into()),
        }
    }

    fn start_resolution(
        &mut self,
        _pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
    ) -> Result<(), PollError> {
        self.k = 0;
        self.slot = 0;
        self.round_collision = false;
        self.first_round = true;
        self.last_found = None;
        self.active = None;
        Ok(())
    }

    fn resolve_step(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
    ) -> Result<ResolveStep, PollError> {
        let Some(reply) = self.next_slot(pcd, ctx)? else {
            self.slot = 0;
            if !self.round_collision {
                return Ok(ResolveStep::Complete);
            }
            if self.k >= MAX_SLOT_EXPONENT {
                return Ok(ResolveStep::Exhausted);
            }
            self.k += 1;
            self.round_collision = false;
            debug!("TypeB: collisions left, next round with {} slots", self.slots());
            return Ok(ResolveStep::Continue);
        };

        let rx = match reply {
            Ok(rx) => rx,
            Err(RfError::Timeout) => return Ok(ResolveStep::Continue),
            Err(RfError::Collision(_)) => {
                self.round_collision = true;
                return Ok(ResolveStep::Collision);
            }
            Err(e) if e.is_integrity() => {
                self.round_collision = true;
                return Ok(ResolveStep::Collision);
            }
            Err(e) => return Err(e.into()),
        };

        let atqb = Atqb::parse(&rx.data)?;
        if registry.contains(&atqb.pupi) {
            return Ok(ResolveStep::Continue);
        }
        let meta = ProtocolMeta::TypeB {
            atqb: heapless::Vec::from_slice(&rx.data)
                .map_err(|_| PollError::Internal("ATQB overflow"))?,
        };
        let index = registry.push(DetectedTag::new(&atqb.pupi, meta, SleepState::Ready)?)?;
        info!("TypeB: resolved PUPI {:02X?} (slot {}/{})", atqb.pupi, self.slot, self.slots());

        if ctx.config.activity_version == ActivityVersion::V1_1 && registry.len() >= 2 {
            if let Some(previous) = self.last_found {
                Self::halt(pcd, registry, previous)?;
            }
        }
        self.last_found = Some(index);

        if self.k == 0 {
            return Ok(ResolveStep::FoundLast);
        }
        Ok(ResolveStep::Found)
    }

    fn settle_at_limit(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &TargetRegistry,
    ) -> Result<bool, PollError> {
        let mut remaining = self.round_collision;
        while let Some(reply) = self.next_slot(pcd, ctx)? {
            match reply {
                Ok(rx) => match Atqb::parse(&rx.data) {
                    Ok(atqb) if registry.contains(&atqb.pupi) => {}
                    _ => remaining = true,
                },
                Err(RfError::Timeout) => {}
                Err(RfError::Collision(_)) => remaining = true,
                Err(e) if e.is_integrity() => remaining = true,
                Err(e) => return Err(e.into()),
            }
        }
        self.slot = 0;
        Ok(remaining)
    }

    fn activate(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<ActivationResult, PollError> {
        let pupi = pupi_of(registry, index)?;
        let tag = registry.entry(index)?;
        if tag.sleep == SleepState::Active && tag.activation.is_some() {
            return Ok(ActivationResult::DeviceActivated);
        }
        pcd.set_config(rf())?;

        if let Some(current) = self.active.take().filter(|&i| i != index) {
            Self::halt(pcd, registry, current)?;
        }
        if registry.entry(index)?.sleep == SleepState::Halted {
            let wupb = codec::request(ctx.config.type_b.afi, 0, true)?;
            match wake_with_retry(ctx.mode(), Technology::TypeB, || {
                pcd.exchange(&TxFrame::Bytes(&wupb))
            }) {
                Ok(_) | Err(RfError::Collision(_)) => {}
                Err(e) if e.is_integrity() => {}
                Err(e) => return Err(e.into()),
            }
            registry.transition_all(SleepState::Halted, SleepState::Ready);
        }

        let cfg = &ctx.config.type_b;
        let params = AttribParams {
            fsdi: cfg.fsdi,
            cid: cfg.cid,
            dri: cfg.dri,
            dsi: cfg.dsi,
        };
        let rx = pcd.exchange(&TxFrame::Bytes(&codec::attrib(&pupi, &params)))?;
        let (mbli, cid) = codec::parse_attrib_answer(&rx.data)?;

        let tag = registry.entry_mut(index)?;
        tag.sleep = SleepState::Active;
        tag.activation = Some(ActivationData::Attrib { mbli, cid });
        self.active = Some(index);
        info!("TypeB: tag {index} activated (MBLI {mbli}, CID {cid})");
        Ok(ActivationResult::DeviceActivated)
    }

    fn deactivate(
        &mut self,
        pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<(), PollError> {
        if registry.entry(index)?.sleep == SleepState::Halted {
            return Ok(());
        }
        pcd.set_config(rf())?;
        Self::halt(pcd, registry, index)?;
        if self.active == Some(index) {
            self.active = None;
        }
        Ok(())
    }
}
