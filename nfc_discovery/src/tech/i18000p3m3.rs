//! ISO18000-3 Mode 3 inventory rounds and handle activation.
//!
//! The front end runs whole inventory rounds and returns a slot result
//! stream, possibly in several chunks. One resolver step is one round.
//! Q grows by one per round that saw a collision, from 0 up to 15.

use crate::codec::i18000p3m3::{
    self as codec, Command, MAX_Q, RoundTarget, SelectAction, SelectTarget, SlotResult,
    SlotResults,
};
use crate::error::PollError;
use crate::registry::{ActivationData, DetectedTag, ProtocolMeta, SleepState, TargetRegistry};
use crate::tech::{
    ActivationResult, Detection, PollContext, ResolveStep, TechnologyPoller, prepare_detection,
    send_no_reply,
};
use nfc_common::discovery::types::Technology;
use nfc_common::rf::transceiver::Transceiver;
use nfc_common::rf::types::{InventoryOption, Protocol, RfConfig, TxFrame};
use tracing::{debug, info, warn};

const TIMEOUT_US: u32 = 10_000;

fn rf() -> RfConfig {
    RfConfig::new(Protocol::I18000p3m3, TIMEOUT_US)
}

/// Run one inventory round and feed every slot of every result chunk to `visit`.
fn run_round(
    pcd: &mut dyn Transceiver,
    select: Option<&Command>,
    begin_round: &Command,
    option: InventoryOption,
    mut visit: impl FnMut(SlotResult<'_>) -> Result<(), PollError>,
) -> Result<(), PollError> {
    let mut chunk = pcd.i18000p3m3_inventory(
        select.map(|(bytes, bits)| (bytes.as_slice(), *bits)),
        (begin_round.0.as_slice(), begin_round.1),
        option,
    )?;
    loop {
        for entry in SlotResults::new(&chunk.data) {
            visit(entry?)?;
        }
        if !chunk.more {
            return Ok(());
        }
        chunk = pcd.i18000p3m3_resume_inventory()?;
    }
}

/// ISO18000-3M3 poller state.
#[derive(Debug, Default)]
pub struct I18000p3m3Poller {
    q: u8,
    /// Rounds run in this resolution.
    rounds: u8,
    /// The next round starts with a Select of the whole population.
    first_round: bool,
    /// The last round saw a collision.
    round_collision: bool,
    /// Unregistered tags answered after the registry filled up.
    leftover: bool,
    active: Option<usize>,
}

impl I18000p3m3Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rounds run by the current resolution.
    pub fn rounds(&self) -> u8 {
        self.rounds
    }
}

impl TechnologyPoller for I18000p3m3Poller {
    fn technology(&self) -> Technology {
        Technology::I18000p3m3
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn detect(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
    ) -> Result<Detection, PollError> {
        prepare_detection(pcd, ctx.config, Technology::I18000p3m3, rf())?;
        self.active = None;
        let session = ctx.config.i18000p3m3.session;
        let select = codec::select_all(session)?;
        let begin = codec::begin_round(session, RoundTarget::A, 0)?;

        let mut detection = Detection::None;
        let round = run_round(pcd, Some(&select), &begin, InventoryOption::Normal, |slot| {
            match slot {
                SlotResult::Tag { reply, .. } => {
                    codec::parse_tag_reply(reply)?;
                    if detection == Detection::None {
                        detection = Detection::Single;
                    }
                }
                SlotResult::Collision => detection = Detection::Collision,
                SlotResult::Timeout => {}
            }
            Ok(())
        });
        match round {
            Ok(()) => Ok(detection),
            Err(PollError::Timeout) => Ok(Detection::None),
            Err(e) => Err(e),
        }
    }

    fn start_resolution(
        &mut self,
        _pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
    ) -> Result<(), PollError> {
        *self = Self {
            first_round: true,
            ..Self::default()
        };
        Ok(())
    }

    fn resolve_step(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
    ) -> Result<ResolveStep, PollError> {
        let session = ctx.config.i18000p3m3.session;
        let select = if self.first_round {
            Some(codec::select_all(session)?)
        } else {
            None
        };
        self.first_round = false;
        let begin = codec::begin_round(session, RoundTarget::A, self.q)?;
        self.rounds += 1;
        debug!("I18000p3m3: round {} with Q={}", self.rounds, self.q);

        let mut found = false;
        let mut collision = false;
        let leftover = &mut self.leftover;
        let round = run_round(pcd, select.as_ref(), &begin, InventoryOption::Normal, |slot| {
            match slot {
                SlotResult::Tag { reply, .. } => {
                    let tag = codec::parse_tag_reply(reply)?;
                    if registry.contains(tag.uii) {
                        return Ok(());
                    }
                    if registry.is_full() {
                        *leftover = true;
                        return Ok(());
                    }
                    let meta = ProtocolMeta::I18000p3m3 {
                        pc: tag.pc,
                        xpc: tag.xpc,
                        handle: None,
                    };
                    registry.push(DetectedTag::new(tag.uii, meta, SleepState::Inventoried)?)?;
                    info!("I18000p3m3: resolved UII {:02X?}", tag.uii);
                    found = true;
                }
                SlotResult::Collision => collision = true,
                SlotResult::Timeout => {}
            }
            Ok(())
        });
        match round {
            Ok(()) | Err(PollError::Timeout) => {}
            Err(e) => return Err(e),
        }

        self.round_collision = collision;
        if !collision {
            return Ok(if found {
                ResolveStep::FoundLast
            } else {
                ResolveStep::Complete
            });
        }
        if self.q >= MAX_Q {
            warn!("I18000p3m3: collisions left at Q={MAX_Q}");
            return Ok(ResolveStep::Exhausted);
        }
        self.q += 1;
        Ok(if found {
            ResolveStep::Found
        } else {
            ResolveStep::Collision
        })
    }

    fn settle_at_limit(
        &mut self,
        _pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        _registry: &TargetRegistry,
    ) -> Result<bool, PollError> {
        Ok(self.leftover || self.round_collision)
    }

    fn activate(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<ActivationResult, PollError> {
        let tag = registry.entry(index)?;
        let ProtocolMeta::I18000p3m3 { pc, .. } = tag.meta else {
            return Err(PollError::Internal("registry entry is not an ISO18000-3M3 tag"));
        };
        let mask = codec::uii_mask(pc, &tag.id)?;
        let session = ctx.config.i18000p3m3.session;
        pcd.set_config(rf())?;

        // Every chunk but the last narrows the population; the last one
        // travels with the addressed round.
        let chunks = mask.len().div_ceil(codec::SELECT_CHUNK_BITS / 8);
        let mut last = None;
        for (i, (pointer, chunk)) in codec::select_chunks(&mask).enumerate() {
            let action = if i == 0 {
                SelectAction::AssertDeassert
            } else {
                SelectAction::DeassertNonMatching
            };
            let cmd = codec::select(
                SelectTarget::session(session),
                action,
                pointer,
                chunk,
                chunk.len() * 8,
            )?;
            if i + 1 < chunks {
                send_no_reply(pcd, &TxFrame::Bits {
                    data: &cmd.0,
                    last_bits: cmd.1,
                })?;
            } else {
                last = Some(cmd);
            }
        }
        let select = last.ok_or(PollError::Internal("empty UII mask"))?;
        let begin = codec::begin_round(session, RoundTarget::A, 0)?;

        let uii = &registry.entry(index)?.id;
        let mut granted = None;
        let mut unexpected = false;
        run_round(pcd, Some(&select), &begin, InventoryOption::GetHandle, |slot| {
            match slot {
                SlotResult::Tag {
                    reply,
                    handle: Some(handle),
                } if granted.is_none() => {
                    if codec::parse_tag_reply(reply)?.uii == uii.as_slice() {
                        granted = Some(handle);
                    } else {
                        unexpected = true;
                    }
                }
                SlotResult::Timeout => {}
                _ => unexpected = true,
            }
            Ok(())
        })?;
        if unexpected {
            return Err(PollError::Protocol("addressed round answered by another tag"));
        }
        let handle = granted.ok_or(PollError::Timeout)?;

        let tag = registry.entry_mut(index)?;
        if let ProtocolMeta::I18000p3m3 { handle: h, .. } = &mut tag.meta {
            *h = Some(handle);
        }
        tag.sleep = SleepState::Active;
        tag.activation = Some(ActivationData::Handle(handle));
        self.active = Some(index);
        info!("I18000p3m3: tag {index} activated, handle {handle:#06x}");
        Ok(ActivationResult::DeviceActivated)
    }

    fn deactivate(
        &mut self,
        _pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<(), PollError> {
        let tag = registry.entry_mut(index)?;
        tag.sleep = SleepState::Inventoried;
        tag.activation = None;
        if self.active == Some(index) {
            self.active = None;
        }
        Ok(())
    }
}
