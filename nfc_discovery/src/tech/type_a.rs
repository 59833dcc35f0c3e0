//! ISO14443-3A detection, anticollision and activation.
//!
//! Resolution finds one tag per traversal: wake-up, bitwise anticollision
//! over up to three cascade levels, SELECT. A colliding bit is resolved
//! by setting it to 1. Every completed tag except the last is halted and
//! REQA surfaces the remaining population.

use crate::codec::type_a::{
    self as codec, CASCADE_TAG, CL_BITS, HLTA, REQA, SHORT_FRAME_BITS, SakProtocol, UidA, WUPA,
};
use crate::error::PollError;
use crate::registry::{ActivationBuf, ActivationData, DetectedTag, ProtocolMeta, SleepState, TargetRegistry};
use crate::tech::{
    ActivationResult, Detection, PollContext, ResolveStep, TechnologyPoller, prepare_detection,
    send_no_reply, wake_with_retry,
};
use nfc_common::discovery::types::{ActivityVersion, OperatingMode, Technology};
use nfc_common::rf::transceiver::{RfError, Transceiver};
use nfc_common::rf::types::{Protocol, RfConfig, RxFrame, TxFrame};
use tracing::{debug, info};

/// Frame waiting time used for every Type A exchange [us].
const TIMEOUT_US: u32 = 1_000;

fn rf(crc: bool) -> RfConfig {
    RfConfig::new(Protocol::Iso14443a, TIMEOUT_US).with_crc(crc, crc)
}

fn atqa_from(frame: &RxFrame) -> [u8; 2] {
    [
        frame.data.first().copied().unwrap_or(0),
        frame.data.get(1).copied().unwrap_or(0),
    ]
}

/// Type A poller state.
#[derive(Debug, Default)]
pub struct TypeAPoller {
    /// Tags were left READY by detection; the first traversal needs no wake-up.
    ready: bool,
    /// ATQA of the last wake-up (partial when it collided).
    atqa: [u8; 2],
    /// A collision occurred since the last wake-up.
    collided: bool,
    /// Wake-up command opening the next traversal.
    next_wake: Option<u8>,
    /// Registry index of the tag in ACTIVE state.
    active: Option<usize>,
}

impl TypeAPoller {
    pub fn new() -> Self {
        Self::default()
    }

    fn wake(
        pcd: &mut dyn Transceiver,
        mode: OperatingMode,
        cmd: u8,
    ) -> Result<RxFrame, RfError> {
        pcd.set_config(rf(false))?;
        wake_with_retry(mode, Technology::TypeA, || {
            pcd.exchange(&TxFrame::Bits {
                data: &[cmd],
                last_bits: SHORT_FRAME_BITS,
            })
        })
    }

    fn halt(pcd: &mut dyn Transceiver) -> Result<(), PollError> {
        pcd.set_config(rf(true))?;
        send_no_reply(pcd, &TxFrame::Bytes(&HLTA))
    }

    /// Timeouts after a collision are transmission errors, not an empty field.
    fn escalate(&self, err: RfError) -> PollError {
        match err {
            RfError::Timeout if self.collided => PollError::Protocol("no response after collision"),
            other => other.into(),
        }
    }

    /// Anticollision loop of one cascade level, returning the complete CLn.
    fn resolve_level(&mut self, pcd: &mut dyn Transceiver, level: u8) -> Result<[u8; 5], PollError> {
        pcd.set_config(rf(false))?;
        let mut cl = [0u8; 5];
        let mut known = 0;

        while known < CL_BITS {
            let (frame, last_bits) = codec::anticollision_frame(level, &cl, known)?;
            let tx = TxFrame::Bits {
                data: &frame,
                last_bits,
            };
            match pcd.exchange(&tx) {
                Ok(rx) => {
                    known = codec::merge_reply(&mut cl, known, &rx.data, rx.bit_len());
                    if known < CL_BITS {
                        return Err(PollError::Protocol("short anticollision reply"));
                    }
                }
                Err(RfError::Collision(info)) => {
                    let valid = codec::merge_reply(&mut cl, known, &info.frame.data, info.bit_pos);
                    if valid >= CL_BITS {
                        return Err(PollError::Protocol("collision outside the UID field"));
                    }
                    codec::set_bit(&mut cl, valid, true);
                    known = valid + 1;
                    self.collided = true;
                    debug!("TypeA: CL{level} collision at bit {valid}, continuing with {known} known bits");
                }
                Err(e) => return Err(self.escalate(e)),
            }
        }
        Ok(cl)
    }

    /// Full traversal of one tag: every cascade level and SELECT.
    fn traverse(&mut self, pcd: &mut dyn Transceiver) -> Result<(UidA, u8), PollError> {
        let overflow = |_| PollError::Internal("Type A UID overflow");
        let mut uid = UidA::new();

        for level in 1..=3u8 {
            let cl = self.resolve_level(pcd, level)?;
            if !codec::bcc_valid(&cl) {
                return Err(PollError::Integrity);
            }

            pcd.set_config(rf(true))?;
            let select = codec::select_frame(level, &cl)?;
            let rx = pcd
                .exchange(&TxFrame::Bytes(&select))
                .map_err(|e| self.escalate(e))?;
            let sak = codec::parse_sak(&rx.data)?;

            if codec::sak_uid_incomplete(sak) {
                if cl[0] != CASCADE_TAG {
                    return Err(PollError::Protocol("incomplete UID without cascade tag"));
                }
                uid.extend_from_slice(&cl[1..4]).map_err(overflow)?;
                continue;
            }
            if cl[0] == CASCADE_TAG {
                return Err(PollError::Protocol("cascade tag in final UID level"));
            }
            uid.extend_from_slice(&cl[..4]).map_err(overflow)?;
            return Ok((uid, sak));
        }
        Err(PollError::Protocol("UID incomplete after cascade level 3"))
    }

    /// Wake every tag and re-select `index` by replaying its cascade levels.
    fn reselect(
        &mut self,
        pcd: &mut dyn Transceiver,
        mode: OperatingMode,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<(), PollError> {
        if let Some(current) = self.active.take() {
            Self::halt(pcd)?;
            registry.entry_mut(current)?.sleep = SleepState::Halted;
        }

        match Self::wake(pcd, mode, WUPA) {
            Ok(_) | Err(RfError::Collision(_)) => {}
            Err(e) if e.is_integrity() => {}
            Err(e) => return Err(e.into()),
        }
        registry.transition_all(SleepState::Halted, SleepState::Ready);

        let fields = codec::cascade_fields(&registry.entry(index)?.id)?;
        pcd.set_config(rf(true))?;
        for (i, cl) in fields.iter().enumerate() {
            let level = i as u8 + 1;
            let rx = pcd.exchange(&TxFrame::Bytes(&codec::select_frame(level, cl)?))?;
            let sak = codec::parse_sak(&rx.data)?;
            let last = i + 1 == fields.len();
            if codec::sak_uid_incomplete(sak) == last {
                return Err(PollError::Protocol("SAK cascade bit mismatch on reselect"));
            }
        }

        registry.entry_mut(index)?.sleep = SleepState::Active;
        self.active = Some(index);
        debug!("TypeA: re-selected tag {index}");
        Ok(())
    }
}

impl TechnologyPoller for TypeAPoller {
    fn technology(&self) -> Technology {
        Technology::TypeA
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn detect(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
    ) -> Result<Detection, PollError> {
        prepare_detection(pcd, ctx.config, Technology::TypeA, rf(false))?;
        self.active = None;
        let cmd = if ctx.mode() == OperatingMode::Emvco { WUPA } else { REQA };

        match Self::wake(pcd, ctx.mode(), cmd) {
            Ok(rx) => {
                self.atqa = codec::parse_atqa(&rx.data)?;
                self.collided = false;
                let keep_ready = ctx.config.activity_version == ActivityVersion::V1_0
                    && ctx.config.bailout_mask().has(Technology::TypeA);
                if keep_ready {
                    self.ready = true;
                } else {
                    // Sleep request: a READY tag drops back to IDLE, not HALT.
                    Self::halt(pcd)?;
                    self.ready = false;
                }
                Ok(Detection::Single)
            }
            Err(RfError::Collision(info)) => {
                self.atqa = atqa_from(&info.frame);
                self.collided = true;
                self.ready = true;
                Ok(Detection::Collision)
            }
            Err(RfError::Timeout) => {
                self.ready = false;
                Ok(Detection::None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn start_resolution(
        &mut self,
        _pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
    ) -> Result<(), PollError> {
        self.next_wake = if self.ready { None } else { Some(WUPA) };
        self.ready = false;
        self.active = None;
        Ok(())
    }

    fn resolve_step(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
    ) -> Result<ResolveStep, PollError> {
        if let Some(cmd) = self.next_wake.take() {
            match Self::wake(pcd, ctx.mode(), cmd) {
                Ok(rx) => {
                    self.atqa = codec::parse_atqa(&rx.data)?;
                    self.collided = false;
                }
                Err(RfError::Collision(info)) => {
                    self.atqa = atqa_from(&info.frame);
                    self.collided = true;
                }
                Err(RfError::Timeout) => return Ok(ResolveStep::Complete),
                Err(e) => return Err(e.into()),
            }
        }

        let (uid, sak) = self.traverse(pcd)?;
        let meta = ProtocolMeta::TypeA {
            atqa: self.atqa,
            sak,
        };
        let index = registry.push(DetectedTag::new(&uid, meta, SleepState::Active)?)?;
        self.active = Some(index);
        info!("TypeA: resolved UID {:02X?} (SAK {sak:#04x})", uid.as_slice());

        if !self.collided {
            return Ok(ResolveStep::FoundLast);
        }
        if !registry.is_full() {
            Self::halt(pcd)?;
            registry.entry_mut(index)?.sleep = SleepState::Halted;
            self.active = None;
            self.next_wake = Some(REQA);
        }
        Ok(ResolveStep::Found)
    }

    fn settle_at_limit(
        &mut self,
        _pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        _registry: &TargetRegistry,
    ) -> Result<bool, PollError> {
        Ok(self.collided)
    }

    fn activate(
        &mut self,
        pcd: &mut dyn Transceiver,
        ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<ActivationResult, PollError> {
        let tag = registry.entry(index)?;
        let ProtocolMeta::TypeA { sak, .. } = tag.meta else {
            return Err(PollError::Internal("Type A activation of foreign tag"));
        };
        if tag.sleep != SleepState::Active || self.active != Some(index) {
            self.reselect(pcd, ctx.mode(), registry, index)?;
        }

        pcd.set_config(rf(true))?;
        let cfg = &ctx.config.type_a;
        let (activation, result) = match codec::classify_sak(sak) {
            SakProtocol::Plain => (ActivationData::Selected, ActivationResult::DeviceActivated),
            SakProtocol::IsoDep => {
                let rx = pcd.exchange(&TxFrame::Bytes(&codec::rats(cfg.fsdi, cfg.cid)))?;
                codec::check_ats(&rx.data)?;
                let ats = ActivationBuf::from_slice(&rx.data)
                    .map_err(|_| PollError::Protocol("ATS too long"))?;
                (ActivationData::Ats(ats), ActivationResult::DeviceActivated)
            }
            SakProtocol::NfcDep => {
                let req = codec::atr_req(&cfg.nfcid3, &cfg.general_bytes)?;
                let rx = pcd.exchange(&TxFrame::Bytes(&req))?;
                codec::check_atr_res(&rx.data)?;
                let res = ActivationBuf::from_slice(&rx.data)
                    .map_err(|_| PollError::Protocol("ATR_RES too long"))?;
                (ActivationData::AtrRes(res), ActivationResult::P2PTargetActivated)
            }
            SakProtocol::Merged => {
                info!("TypeA: tag {index} advertises ISO-DEP and NFC-DEP (SAK {sak:#04x})");
                return Ok(ActivationResult::MergedSelResFound);
            }
        };

        registry.entry_mut(index)?.activation = Some(activation);
        info!("TypeA: tag {index} activated ({result:?})");
        Ok(result)
    }

    fn deactivate(
        &mut self,
        pcd: &mut dyn Transceiver,
        _ctx: &mut PollContext<'_>,
        registry: &mut TargetRegistry,
        index: usize,
    ) -> Result<(), PollError> {
        let tag = registry.entry_mut(index)?;
        if tag.sleep != SleepState::Active {
            return Ok(());
        }
        Self::halt(pcd)?;
        tag.sleep = SleepState::Halted;
        tag.activation = None;
        if self.active == Some(index) {
            self.active = None;
        }
        Ok(())
    }
}
