//! ISO15693 inventory and addressed selection.
//!
//! Colliding slots are narrowed depth first: the slot nibble is appended to
//! the round mask and pushed on a stack of masks still to inventory. One
//! resolver step handles one slot.

use crate::codec::type_v::{self as codec, InventoryMask, InventoryResponse, UID_LEN};
use crate::error::PollError;
use crate::registry::{ActivationData, DetectedTag, ProtocolMeta, SleepState, TargetRegistry};
use crate::tech::{
    ActivationResult, Detection, PollContext, ResolveStep, TechnologyPoller, prepare_detection,
    send_no_reply,
};
use nfc_common::discovery::types::Technology;
use nfc_common::rf::transceiver::{RfError, Transceiver};
use nfc_common::rf::types::{Protocol, RfConfig, RxFrame, TxFrame};
use tracing::{debug, info};

const TIMEOUT_US: u32 = 5_000;
/// Slots of a non single-slot inventory round.
const SLOTS: u8 = 16;
const MASK_STACK_DEPTH: usize = 256;

fn rf() -> RfConfig {
    RfConfig::new(Protocol::Iso15693, TIMEOUT_US)
}

fn uid_of(registry: &TargetRegistry, index: usize) -> Result<[u8; UID_LEN], PollError> {
    registry
        .entry(index)?
        .id
        .as_slice()
        .try_into()
        .map_err(|_| PollError::Internal("Type V identifier is not a UID"))
}

/// How a slot answer affects the resolution.
enum Slot {
    Empty,
    Tag(InventoryResponse),
    Collision,
}

fn classify(reply: Result<RxFrame, RfError>) -> Result<Slot, PollError> {
    match reply {
        Ok(rx) => Ok(Slot::Tag(InventoryResponse::parse(&rx.data)?)),
        Err(RfError::Timeout) => Ok(Slot::Empty),
        Err(RfError::Collision(_)) => Ok(Slot::Collision),
        Err(e) if e.is_integrity() => Ok(Slot::Collision),
        Err(e) => Err(e.into()),
    }
}

/// Type V poller state.
#[derive(Debug, Default)]
pub struct TypeVPoller {
    /// Masks still to inventory, deepest last.
    masks: heapless::Vec<InventoryMask, MASK_STACK_DEPTH>,
    /// Mask of the open round and the slot handled last.
    round: Option<(InventoryMask, u8)>,
    active: Option<usize>,
}

impl TypeVPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a round or advance to its next slot. `None` once the stack is empty.
    fn next_slot(
        &mut self,
        pcd: &mut dyn Transceiver,
        afi: Option<u8>,
    ) -> Result<Option<(InventoryMask, u8, Result<RxFrame, RfError>)>, PollError> {
        let (mask, slot) = match self.round {
            Some((mask, slot)) if slot + 1 < SLOTS => (mask, slot + 1),
            _ => match self.masks.pop() {
                Some(mask) => (mask, 0),
                None => {
                    self.round = None;
                    return Ok(None);
                }
            },
        };
        let reply = if slot == 0 {
            debug!("TypeV: inventory round, mask {:#x}/{}", mask.value, mask.len);
            let frame = codec::inventory(afi, false, &mask)?;
            pcd.exchange(&TxFrame::Bytes(&frame))
        } else {
            pcd.exchange(&TxFrame::Eof)
        };
        self.round = if slot + 1 < SLOTS {
            Some((mask, slot))
        } else {
            None
        };
        Ok(Some((mask, slot, reply)))
    }
}

impl TechnologyPoller for TypeVPoller {
    fn technology(&self) -> Technology {
        Technology::TypeV
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn detect(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
    ) -> Result<Detection, PollError> {
        prepare_detection(pcd, ctx.config, Technology::TypeV, rf())?;
        self.active = None;
        let frame = codec::inventory(ctx.config.type_v.afi, true, &InventoryMask::default())?;
        match classify(pcd.exchange(&TxFrame::Bytes(&frame)))? {
            Slot::Empty => Ok(Detection::None),
            Slot::Tag(_) => Ok(Detection::Single),
            Slot::Collision => Ok(Detection::Collision),
        }
    }

    fn start_resolution(
        &mut self,
        _pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
    ) -> Result<(), PollError> {
        self.masks.clear();
        self.round = None;
        self.active = None;
        self.masks
            .push(InventoryMask::default())
            .map_err(|_| PollError::Internal("mask stack overflow"))
    }

    fn resolve_step(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
    ) -> Result<ResolveStep, PollError> {
        let Some((mask, slot, reply)) = self.next_slot(pcd, ctx.config.type_v.afi)? else {
            return Ok(ResolveStep::Complete);
        };

        match classify(reply)? {
            Slot::Empty => Ok(ResolveStep::Continue),
            Slot::Collision => {
                self.masks
                    .push(mask.extend(slot)?)
                    .map_err(|_| PollError::Internal("mask stack overflow"))?;
                Ok(ResolveStep::Collision)
            }
            Slot::Tag(resp) => {
                if registry.contains(&resp.uid) {
                    return Ok(ResolveStep::Continue);
                }
                let meta = ProtocolMeta::TypeV { dsfid: resp.dsfid };
                registry.push(DetectedTag::new(&resp.uid, meta, SleepState::Ready)?)?;
                info!("TypeV: resolved UID {:02X?} (DSFID {:#04x})", resp.uid, resp.dsfid);
                Ok(ResolveStep::Found)
            }
        }
    }

    fn settle_at_limit(
        &mut self,
        pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        registry: &TargetRegistry,
    ) -> Result<bool, PollError> {
        let mut remaining = false;
        while let Some((mask, mut slot)) = self.round {
            slot += 1;
            let reply = pcd.exchange(&TxFrame::Eof);
            self.round = (slot + 1 < SLOTS).then_some((mask, slot));
            match classify(reply)? {
                Slot::Empty => {}
                Slot::Tag(resp) if registry.contains(&resp.uid) => {}
                Slot::Tag(_) | Slot::Collision => remaining = true,
            }
        }
        Ok(remaining || !self.masks.is_empty())
    }

    fn activate(
        &mut self,
        pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<ActivationResult, PollError> {
        let uid = uid_of(registry, index)?;
        pcd.set_config(rf())?;
        let rx = pcd.exchange(&TxFrame::Bytes(&codec::select(&uid)))?;
        codec::check_response(&rx.data)?;

        // A selected tag deselects any other.
        registry.transition_all(SleepState::Active, SleepState::Ready);
        let tag = registry.entry_mut(index)?;
        tag.sleep = SleepState::Active;
        tag.activation = Some(ActivationData::SelectedV);
        self.active = Some(index);
        info!("TypeV: tag {index} selected");
        Ok(ActivationResult::DeviceActivated)
    }

    fn deactivate(
        &mut self,
        pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<(), PollError> {
        let uid = uid_of(registry, index)?;
        pcd.set_config(rf())?;
        send_no_reply(pcd, &TxFrame::Bytes(&codec::stay_quiet(&uid)))?;
        let tag = registry.entry_mut(index)?;
        tag.sleep = SleepState::Halted;
        tag.activation = None;
        if self.active == Some(index) {
            self.active = None;
        }
        Ok(())
    }
}
