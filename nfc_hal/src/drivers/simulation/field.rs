//! Simulated RF field.
//!
//! [`SimulatedField`] implements [`Transceiver`] over a population of tag
//! models. Every frame reaches every tag of the configured protocol; their
//! replies are superposed the way the air interface would:
//!
//! - Type A: bitwise, a collision reported at the first differing bit
//! - Type B: differing ATQBs garble into a CRC error
//! - Type V: several replies in one slot are a collision
//! - ISO18000-3M3: the front end runs whole rounds and reports per slot
//!
//! Nothing here sleeps; `wait` only accounts for the requested time.

use super::tags::{
    BeginRound, I18000p3m3Tag, SelectCommand, TypeATag, TypeBTag, TypeVTag,
};
use nfc_common::consts::MAX_INVENTORY_RESULT_LEN;
use nfc_common::rf::transceiver::{RfError, Transceiver};
use nfc_common::rf::types::{
    CollisionInfo, InventoryBuf, InventoryOption, InventoryResult, Protocol, RfConfig, RxFrame,
    TxFrame, WaitUnit,
};
use nfc_discovery::codec::type_a::{self as a_codec, HLTA, NFC_DEP_SB, NVB_SELECT, RATS, REQA, SHORT_FRAME_BITS, WUPA};
use nfc_discovery::codec::type_b::{APF, ATTRIB};
use nfc_discovery::codec::type_v::{
    CMD_INVENTORY, CMD_SELECT, CMD_STAY_QUIET, FLAG_AFI, FLAG_INVENTORY, FLAG_ONE_SLOT,
    InventoryMask, UID_LEN,
};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

const HLTB_CMD: u8 = 0x50;

const STATUS_DATA: u8 = 0;
const STATUS_HANDLE: u8 = 1;
const STATUS_TIMEOUT: u8 = 2;
const STATUS_COLLISION: u8 = 3;

/// Smallest inventory chunk that still holds the longest slot entry.
pub const MIN_INVENTORY_CHUNK: usize = 80;

/// A tag of any technology.
#[derive(Debug, Clone)]
pub enum SimTag {
    TypeA(TypeATag),
    TypeB(TypeBTag),
    TypeV(TypeVTag),
    I18000p3m3(I18000p3m3Tag),
}

impl From<TypeATag> for SimTag {
    fn from(tag: TypeATag) -> Self {
        Self::TypeA(tag)
    }
}

impl From<TypeBTag> for SimTag {
    fn from(tag: TypeBTag) -> Self {
        Self::TypeB(tag)
    }
}

impl From<TypeVTag> for SimTag {
    fn from(tag: TypeVTag) -> Self {
        Self::TypeV(tag)
    }
}

impl From<I18000p3m3Tag> for SimTag {
    fn from(tag: I18000p3m3Tag) -> Self {
        Self::I18000p3m3(tag)
    }
}

/// Counters kept by the field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldStats {
    /// Frames exchanged, EOFs included.
    pub exchanges: u64,
    /// Off-to-on transitions.
    pub field_cycles: u64,
    pub inventory_rounds: u64,
    /// Time requested through `wait` [us].
    pub waited_us: u64,
}

#[derive(Debug)]
pub struct SimulatedField {
    config: Option<RfConfig>,
    powered: bool,
    type_a: Vec<TypeATag>,
    type_b: Vec<TypeBTag>,
    type_v: Vec<TypeVTag>,
    i18000p3m3: Vec<I18000p3m3Tag>,
    /// Replies of the remaining slots of an open Type V round.
    v_round: VecDeque<Vec<Vec<u8>>>,
    /// Undelivered chunks of the last inventory round.
    m3_chunks: VecDeque<InventoryBuf>,
    chunk_len: usize,
    stats: FieldStats,
}

impl Default for SimulatedField {
    fn default() -> Self {
        Self {
            config: None,
            powered: false,
            type_a: Vec::new(),
            type_b: Vec::new(),
            type_v: Vec::new(),
            i18000p3m3: Vec::new(),
            v_round: VecDeque::new(),
            m3_chunks: VecDeque::new(),
            chunk_len: MAX_INVENTORY_RESULT_LEN,
            stats: FieldStats::default(),
        }
    }
}

impl SimulatedField {
    /// Empty field, switched off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit inventory result chunks to `len` bytes
    /// (clamped to `MIN_INVENTORY_CHUNK..=MAX_INVENTORY_RESULT_LEN`).
    pub fn with_inventory_chunk(mut self, len: usize) -> Self {
        self.chunk_len = len.clamp(MIN_INVENTORY_CHUNK, MAX_INVENTORY_RESULT_LEN);
        self
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_tag(mut self, tag: impl Into<SimTag>) -> Self {
        self.insert(tag);
        self
    }

    /// Bring a tag into the field. It powers up at once when the field is on.
    pub fn insert(&mut self, tag: impl Into<SimTag>) {
        let mut tag = tag.into();
        if self.powered {
            match &mut tag {
                SimTag::TypeA(t) => t.power_up(),
                SimTag::TypeB(t) => t.power_up(),
                SimTag::TypeV(t) => t.power_up(),
                SimTag::I18000p3m3(t) => t.power_up(),
            }
        }
        match tag {
            SimTag::TypeA(t) => self.type_a.push(t),
            SimTag::TypeB(t) => self.type_b.push(t),
            SimTag::TypeV(t) => self.type_v.push(t),
            SimTag::I18000p3m3(t) => self.i18000p3m3.push(t),
        }
    }

    /// Take every tag with identifier `id` out of the field.
    ///
    /// `id` is compared the way the discovery engine registers it: Type A
    /// UID, Type B PUPI, Type V UID in transmission order, ISO18000-3M3 UII.
    pub fn remove_tag(&mut self, id: &[u8]) -> bool {
        let before = self.tag_count();
        self.type_a.retain(|t| t.uid() != id);
        self.type_b.retain(|t| t.pupi().as_slice() != id);
        self.type_v.retain(|t| t.uid().as_slice() != id);
        self.i18000p3m3.retain(|t| t.uii() != id);
        let removed = self.tag_count() != before;
        if removed {
            debug!("simulation: tag {id:02X?} left the field");
        }
        removed
    }

    pub fn tag_count(&self) -> usize {
        self.type_a.len() + self.type_b.len() + self.type_v.len() + self.i18000p3m3.len()
    }

    pub fn type_a_tags(&self) -> &[TypeATag] {
        &self.type_a
    }

    pub fn type_b_tags(&self) -> &[TypeBTag] {
        &self.type_b
    }

    pub fn type_v_tags(&self) -> &[TypeVTag] {
        &self.type_v
    }

    pub fn i18000p3m3_tags(&self) -> &[I18000p3m3Tag] {
        &self.i18000p3m3
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn stats(&self) -> FieldStats {
        self.stats
    }

    fn protocol(&self) -> Result<Protocol, RfError> {
        self.config
            .map(|c| c.protocol)
            .ok_or_else(|| RfError::Io("front end not configured".to_string()))
    }

    // ─── Type A ─────────────────────────────────────────────────────

    fn exchange_a(&mut self, tx: &TxFrame<'_>) -> Result<RxFrame, RfError> {
        match *tx {
            TxFrame::Bits {
                data: &[cmd],
                last_bits: SHORT_FRAME_BITS,
            } if cmd == REQA || cmd == WUPA => {
                let replies: Vec<Vec<u8>> = self
                    .type_a
                    .iter_mut()
                    .filter_map(|t| t.wake(cmd))
                    .map(|atqa| atqa.to_vec())
                    .collect();
                superpose(&replies, 0)
            }
            TxFrame::Bits { data, .. } | TxFrame::Bytes(data) if data.len() >= 2 => {
                let level = (1..=3u8).find(|&l| a_codec::sel_code(l).ok() == Some(data[0]));
                match level {
                    Some(level) => self.cascade_a(level, data),
                    None => self.command_a(data),
                }
            }
            _ => Err(RfError::Timeout),
        }
    }

    /// Anticollision or SELECT of one cascade level.
    fn cascade_a(&mut self, level: u8, data: &[u8]) -> Result<RxFrame, RfError> {
        let nvb = data[1];
        if nvb == NVB_SELECT {
            let Some(cl) = data.get(2..7) else {
                return Err(RfError::Timeout);
            };
            let replies: Vec<Vec<u8>> = self
                .type_a
                .iter_mut()
                .filter_map(|t| t.select(level, cl))
                .map(|sak| vec![sak])
                .collect();
            return superpose(&replies, 0);
        }
        let known = usize::from(nvb >> 4).saturating_sub(2) * 8 + usize::from(nvb & 0x0F);
        let prefix = &data[2..];
        let replies: Vec<Vec<u8>> = self
            .type_a
            .iter()
            .filter_map(|t| t.anticollision(level, prefix, known))
            .collect();
        trace!("simulation: CL{level} anticollision, {known} bits known, {} replies", replies.len());
        superpose(&replies, known % 8)
    }

    fn command_a(&mut self, data: &[u8]) -> Result<RxFrame, RfError> {
        if data == HLTA {
            self.type_a.iter_mut().for_each(TypeATag::halt);
            return Err(RfError::Timeout);
        }
        let replies: Vec<Vec<u8>> = match data[0] {
            RATS => self.type_a.iter().filter_map(TypeATag::rats).collect(),
            NFC_DEP_SB => self.type_a.iter().filter_map(|t| t.atr_req(data)).collect(),
            _ => Vec::new(),
        };
        superpose(&replies, 0)
    }

    // ─── Type B ─────────────────────────────────────────────────────

    fn exchange_b(&mut self, tx: &TxFrame<'_>) -> Result<RxFrame, RfError> {
        let TxFrame::Bytes(data) = *tx else {
            return Err(RfError::Timeout);
        };
        let replies: Vec<Vec<u8>> = match data {
            &[APF, afi, param] => {
                let wakeup = param & 0x08 != 0;
                let slots = 1u8 << (param & 0x07).min(4);
                self.type_b
                    .iter_mut()
                    .filter_map(|t| t.request(afi, slots, wakeup))
                    .collect()
            }
            &[marker] if marker & 0x0F == APF => self
                .type_b
                .iter_mut()
                .filter_map(|t| t.slot_marker(marker >> 4))
                .collect(),
            &[HLTB_CMD, ref pupi @ ..] if pupi.len() == 4 => {
                self.type_b.iter_mut().filter_map(|t| t.halt(pupi)).collect()
            }
            &[ATTRIB, ref rest @ ..] if rest.len() == 8 => {
                let (pupi, params) = rest.split_at(4);
                self.type_b
                    .iter_mut()
                    .filter_map(|t| t.attrib(pupi, params[3]))
                    .collect()
            }
            _ => Vec::new(),
        };
        match replies.as_slice() {
            [] => Err(RfError::Timeout),
            [first, rest @ ..] if rest.iter().all(|r| r == first) => RxFrame::from_bytes(first),
            _ => Err(RfError::Crc),
        }
    }

    // ─── Type V ─────────────────────────────────────────────────────

    fn exchange_v(&mut self, tx: &TxFrame<'_>) -> Result<RxFrame, RfError> {
        let data = match *tx {
            TxFrame::Eof => {
                let slot = self.v_round.pop_front().unwrap_or_default();
                return slot_reply(slot);
            }
            TxFrame::Bytes(data) => data,
            TxFrame::Bits { .. } => return Err(RfError::Timeout),
        };
        self.v_round.clear();
        match data {
            &[flags, CMD_INVENTORY, ref rest @ ..] if flags & FLAG_INVENTORY != 0 => {
                self.inventory_v(flags, rest)
            }
            &[_, cmd, ref uid @ ..] if uid.len() == UID_LEN => match cmd {
                CMD_SELECT => {
                    let replies: Vec<Vec<u8>> = self
                        .type_v
                        .iter_mut()
                        .filter_map(|t| t.select(uid))
                        .collect();
                    slot_reply(replies)
                }
                CMD_STAY_QUIET => {
                    self.type_v.iter_mut().for_each(|t| t.stay_quiet(uid));
                    Err(RfError::Timeout)
                }
                _ => Err(RfError::Timeout),
            },
            _ => Err(RfError::Timeout),
        }
    }

    /// `[AFI] MaskLen Mask` after the flags and command bytes.
    fn inventory_v(&mut self, flags: u8, rest: &[u8]) -> Result<RxFrame, RfError> {
        let (afi, rest) = if flags & FLAG_AFI != 0 {
            match rest.split_first() {
                Some((&afi, rest)) => (Some(afi), rest),
                None => return Err(RfError::Timeout),
            }
        } else {
            (None, rest)
        };
        let Some((&len, mask_bytes)) = rest.split_first() else {
            return Err(RfError::Timeout);
        };
        if len > 64 || mask_bytes.len() != usize::from(len).div_ceil(8) {
            return Err(RfError::Timeout);
        }
        let mut value = [0u8; 8];
        value[..mask_bytes.len()].copy_from_slice(mask_bytes);
        let mask = InventoryMask {
            value: u64::from_le_bytes(value),
            len,
        };

        let one_slot = flags & FLAG_ONE_SLOT != 0;
        let mut slots: Vec<Vec<Vec<u8>>> = vec![Vec::new(); if one_slot { 1 } else { 16 }];
        for tag in &self.type_v {
            if let Some((slot, rsp)) = tag.inventory(afi, &mask, one_slot) {
                slots[usize::from(slot)].push(rsp);
            }
        }
        let mut slots: VecDeque<_> = slots.into();
        let first = slots.pop_front().unwrap_or_default();
        self.v_round = slots;
        slot_reply(first)
    }

    // ─── ISO18000-3M3 ───────────────────────────────────────────────

    fn exchange_m3(&mut self, tx: &TxFrame<'_>) -> Result<RxFrame, RfError> {
        if let TxFrame::Bits { data, last_bits } = *tx {
            if let Some(cmd) = SelectCommand::decode(data, last_bits) {
                self.apply_select(&cmd);
            }
        }
        Err(RfError::Timeout)
    }

    fn apply_select(&mut self, cmd: &SelectCommand) {
        trace!(
            "simulation: Select target {} action {} pointer {:#x}, {} mask bits",
            cmd.target, cmd.action, cmd.pointer, cmd.mask_bits
        );
        for tag in &mut self.i18000p3m3 {
            tag.apply_select(cmd);
        }
    }

    /// Slot entries of one round, in slot order.
    fn run_round(&mut self, round: &BeginRound, option: InventoryOption) -> Vec<Vec<u8>> {
        let mut by_slot: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, tag) in self.i18000p3m3.iter().enumerate() {
            if tag.participates(round) {
                by_slot.entry(tag.slot(round.q)).or_default().push(i);
            }
        }
        let open = option == InventoryOption::GetHandle;
        (0..1u32 << round.q)
            .map(|slot| match by_slot.get(&slot).map(Vec::as_slice) {
                None | Some([]) => vec![STATUS_TIMEOUT],
                Some(&[i]) => {
                    let tag = &mut self.i18000p3m3[i];
                    let mut body = tag.reply();
                    let status = if open {
                        body.extend_from_slice(&tag.handle().to_be_bytes());
                        STATUS_HANDLE
                    } else {
                        STATUS_DATA
                    };
                    tag.acknowledge(round.session, open);
                    let mut entry = vec![status, body.len() as u8, 0];
                    entry.extend_from_slice(&body);
                    entry
                }
                Some(_) => vec![STATUS_COLLISION],
            })
            .collect()
    }

    /// Pack entries into chunks of at most `chunk_len` bytes.
    fn pack(&self, entries: Vec<Vec<u8>>) -> Result<VecDeque<InventoryBuf>, RfError> {
        let overflow = |_| RfError::Io("inventory entry exceeds the result buffer".to_string());
        let mut chunks = VecDeque::new();
        let mut current = InventoryBuf::new();
        for entry in entries {
            if !current.is_empty() && current.len() + entry.len() > self.chunk_len {
                chunks.push_back(std::mem::take(&mut current));
            }
            current.extend_from_slice(&entry).map_err(overflow)?;
        }
        chunks.push_back(current);
        Ok(chunks)
    }

    fn next_chunk(&mut self) -> Result<InventoryResult, RfError> {
        let data = self
            .m3_chunks
            .pop_front()
            .ok_or_else(|| RfError::Io("no inventory in progress".to_string()))?;
        Ok(InventoryResult {
            data,
            more: !self.m3_chunks.is_empty(),
        })
    }
}

/// Bitwise superposition of aligned Type A replies starting at bit `start`.
fn superpose(replies: &[Vec<u8>], start: usize) -> Result<RxFrame, RfError> {
    let Some(first) = replies.first() else {
        return Err(RfError::Timeout);
    };
    let bits = replies.iter().map(|r| r.len() * 8).min().unwrap_or(0);
    let bit = |reply: &[u8], pos: usize| (reply[pos / 8] >> (pos % 8)) & 1;
    let collision = (start..bits).find(|&pos| replies.iter().any(|r| bit(r, pos) != bit(first, pos)));
    let Some(pos) = collision else {
        return RxFrame::from_bytes(first);
    };
    let mut frame = RxFrame::from_bytes(&first[..pos.div_ceil(8)])?;
    if pos % 8 != 0 {
        if let Some(last) = frame.data.last_mut() {
            *last &= (1u8 << (pos % 8)) - 1;
        }
    }
    frame.last_bits = (pos % 8) as u8;
    Err(RfError::Collision(CollisionInfo {
        frame,
        bit_pos: pos,
    }))
}

/// Replies of one Type V slot.
fn slot_reply(replies: Vec<Vec<u8>>) -> Result<RxFrame, RfError> {
    match replies.as_slice() {
        [] => Err(RfError::Timeout),
        [single] => RxFrame::from_bytes(single),
        _ => Err(RfError::Collision(CollisionInfo::default())),
    }
}

impl Transceiver for SimulatedField {
    fn exchange(&mut self, tx: &TxFrame<'_>) -> Result<RxFrame, RfError> {
        self.stats.exchanges += 1;
        if !self.powered {
            return Err(RfError::Timeout);
        }
        match self.protocol()? {
            Protocol::Iso14443a => self.exchange_a(tx),
            Protocol::Iso14443b => self.exchange_b(tx),
            Protocol::Iso15693 => self.exchange_v(tx),
            Protocol::I18000p3m3 => self.exchange_m3(tx),
        }
    }

    fn field_on(&mut self) -> Result<(), RfError> {
        if self.powered {
            return Ok(());
        }
        self.powered = true;
        self.stats.field_cycles += 1;
        self.type_a.iter_mut().for_each(TypeATag::power_up);
        self.type_b.iter_mut().for_each(TypeBTag::power_up);
        self.type_v.iter_mut().for_each(TypeVTag::power_up);
        self.i18000p3m3.iter_mut().for_each(I18000p3m3Tag::power_up);
        trace!("simulation: field on, {} tags", self.tag_count());
        Ok(())
    }

    fn field_off(&mut self) -> Result<(), RfError> {
        self.powered = false;
        self.v_round.clear();
        self.m3_chunks.clear();
        Ok(())
    }

    fn wait(&mut self, unit: WaitUnit, duration: u32) -> Result<(), RfError> {
        self.stats.waited_us += unit.to_micros(duration);
        Ok(())
    }

    fn set_config(&mut self, config: RfConfig) -> Result<(), RfError> {
        self.config = Some(config);
        Ok(())
    }

    fn i18000p3m3_inventory(
        &mut self,
        select: Option<(&[u8], u8)>,
        begin_round: (&[u8], u8),
        option: InventoryOption,
    ) -> Result<InventoryResult, RfError> {
        if self.protocol()? != Protocol::I18000p3m3 {
            return Err(RfError::Io("inventory outside ISO18000-3M3 mode".to_string()));
        }
        self.m3_chunks.clear();
        if !self.powered {
            return Err(RfError::Timeout);
        }
        if let Some((data, last_bits)) = select {
            let cmd = SelectCommand::decode(data, last_bits)
                .ok_or_else(|| RfError::Io("malformed Select".to_string()))?;
            self.apply_select(&cmd);
        }
        let round = BeginRound::decode(begin_round.0, begin_round.1)
            .ok_or_else(|| RfError::Io("malformed BeginRound".to_string()))?;
        self.stats.inventory_rounds += 1;
        let entries = self.run_round(&round, option);
        self.m3_chunks = self.pack(entries)?;
        self.next_chunk()
    }

    fn i18000p3m3_resume_inventory(&mut self) -> Result<InventoryResult, RfError> {
        self.next_chunk()
    }
}
