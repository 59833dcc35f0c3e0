//! ISO18000-3 Mode 3 frame codec.
//!
//! Commands are bit-packed MSB first. Returned buffers carry the number of
//! valid bits in their final byte (0 = all 8), which is what the transceiver
//! inventory API expects. CRC-5/CRC-16 are appended by the front end.

use crate::error::PollError;
use nfc_common::consts::MAX_ID_LEN;

// ─── Command fields ─────────────────────────────────────────────────

const CMD_SELECT: u32 = 0b1010;
const CMD_BEGIN_ROUND: u32 = 0b1000;

/// Memory bank holding CRC, PC and UII.
pub const MEMBANK_UII: u8 = 0b01;
/// Bit address of the PC word in the UII bank.
pub const PC_POINTER: u32 = 0x10;
/// Mask bits carried by one Select command (byte aligned, below 256).
pub const SELECT_CHUNK_BITS: usize = 248;
/// Highest Q (2^15 slots).
pub const MAX_Q: u8 = 15;

/// Select target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectTarget {
    S0 = 0b000,
    S1 = 0b001,
    S2 = 0b010,
    S3 = 0b011,
    Sl = 0b100,
}

impl SelectTarget {
    /// Inventoried flag of `session` (0..=3).
    pub const fn session(session: u8) -> Self {
        match session & 0x03 {
            0 => Self::S0,
            1 => Self::S1,
            2 => Self::S2,
            _ => Self::S3,
        }
    }
}

/// Select action: what matching and non-matching tags do with the target flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectAction {
    /// Matching: assert SL / inventoried A. Non-matching: deassert SL / inventoried B.
    AssertDeassert = 0b000,
    /// Matching: nothing. Non-matching: deassert SL / inventoried B.
    DeassertNonMatching = 0b010,
}

/// Inventoried flag value targeted by BeginRound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoundTarget {
    A = 0,
    B = 1,
}

/// Encoded command: bytes and valid bits in the final byte.
pub type Command = (heapless::Vec<u8, 40>, u8);

// ─── Bit packing ────────────────────────────────────────────────────

/// MSB-first bit writer over a fixed buffer.
#[derive(Debug, Default)]
pub struct BitWriter<const N: usize> {
    buf: heapless::Vec<u8, N>,
    bits: usize,
}

impl<const N: usize> BitWriter<N> {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            bits: 0,
        }
    }

    /// Append the low `count` bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u32, count: u8) -> Result<(), PollError> {
        for i in (0..count).rev() {
            self.push_bit((value >> i) & 1 == 1)?;
        }
        Ok(())
    }

    /// Append the first `count` bits of `bytes`, MSB of byte 0 first.
    pub fn push_slice(&mut self, bytes: &[u8], count: usize) -> Result<(), PollError> {
        if count > bytes.len() * 8 {
            return Err(PollError::Internal("bit count exceeds slice"));
        }
        for i in 0..count {
            self.push_bit((bytes[i / 8] >> (7 - i % 8)) & 1 == 1)?;
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) -> Result<(), PollError> {
        if self.bits % 8 == 0 {
            self.buf
                .push(0)
                .map_err(|_| PollError::Internal("command buffer overflow"))?;
        }
        if bit {
            let last = self.buf.len() - 1;
            self.buf[last] |= 0x80 >> (self.bits % 8);
        }
        self.bits += 1;
        Ok(())
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Buffer and valid bits in the final byte (0 = all 8).
    pub fn finish(self) -> (heapless::Vec<u8, N>, u8) {
        let last = (self.bits % 8) as u8;
        (self.buf, last)
    }
}

/// Append an extensible bit vector: 7-bit groups, MSB group first, the
/// leading bit of every group but the last set.
pub fn push_ebv<const N: usize>(w: &mut BitWriter<N>, value: u32) -> Result<(), PollError> {
    let mut groups = 1;
    while groups < 5 && value >> (7 * groups) != 0 {
        groups += 1;
    }
    for g in (0..groups).rev() {
        let more = u32::from(g > 0);
        w.push_bits((more << 7) | ((value >> (7 * g)) & 0x7F), 8)?;
    }
    Ok(())
}

// ─── Commands ───────────────────────────────────────────────────────

/// Select: `1010 Target Action MemBank Pointer(EBV) Length Mask Truncate`.
pub fn select(
    target: SelectTarget,
    action: SelectAction,
    pointer: u32,
    mask: &[u8],
    mask_bits: usize,
) -> Result<Command, PollError> {
    if mask_bits > 255 {
        return Err(PollError::Internal("select mask longer than 255 bits"));
    }
    let mut w = BitWriter::new();
    w.push_bits(CMD_SELECT, 4)?;
    w.push_bits(target as u32, 3)?;
    w.push_bits(action as u32, 3)?;
    w.push_bits(u32::from(MEMBANK_UII), 2)?;
    push_ebv(&mut w, pointer)?;
    w.push_bits(mask_bits as u32, 8)?;
    w.push_slice(mask, mask_bits)?;
    // no truncation
    w.push_bits(0, 1)?;
    Ok(w.finish())
}

/// Select matching every tag in `session`.
pub fn select_all(session: u8) -> Result<Command, PollError> {
    select(
        SelectTarget::session(session),
        SelectAction::AssertDeassert,
        0,
        &[],
        0,
    )
}

/// BeginRound: `1000 DR M TRext Sel Session Target Q`.
///
/// DR = 8, M = 00 (Manchester 2), no pilot tone, Sel = 00 (all).
pub fn begin_round(session: u8, target: RoundTarget, q: u8) -> Result<Command, PollError> {
    if q > MAX_Q {
        return Err(PollError::Internal("Q above 15"));
    }
    let mut w = BitWriter::new();
    w.push_bits(CMD_BEGIN_ROUND, 4)?;
    w.push_bits(0, 1)?;
    w.push_bits(0b00, 2)?;
    w.push_bits(0, 1)?;
    w.push_bits(0b00, 2)?;
    w.push_bits(u32::from(session & 0x03), 2)?;
    w.push_bits(target as u32, 1)?;
    w.push_bits(u32::from(q), 4)?;
    Ok(w.finish())
}

// ─── Tag replies ────────────────────────────────────────────────────

/// Decoded `PC [XPC_W1 [XPC_W2]] UII` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReply<'a> {
    pub pc: u16,
    pub xpc: heapless::Vec<u16, 2>,
    pub uii: &'a [u8],
}

const PC_XI: u8 = 0x02;
const XPC_XEB: u8 = 0x80;

/// Decode a tag reply header.
///
/// # Errors
/// `Internal` when the PC length field is zero or disagrees with the reply
/// length, or the XPC words are truncated.
pub fn parse_tag_reply(reply: &[u8]) -> Result<TagReply<'_>, PollError> {
    let malformed = PollError::Internal("malformed PC/XPC header");
    if reply.len() < 2 {
        return Err(malformed);
    }
    let pc = u16::from_be_bytes([reply[0], reply[1]]);
    let words = (reply[0] >> 3) as usize;
    let mut offset = 2;
    let mut xpc = heapless::Vec::new();

    if reply[0] & PC_XI != 0 {
        let w1 = reply.get(2..4).ok_or(malformed.clone())?;
        let _ = xpc.push(u16::from_be_bytes([w1[0], w1[1]]));
        offset = 4;
        if w1[0] & XPC_XEB != 0 {
            let w2 = reply.get(4..6).ok_or(malformed.clone())?;
            let _ = xpc.push(u16::from_be_bytes([w2[0], w2[1]]));
            offset = 6;
        }
    }

    if words == 0 || reply.len() != offset + words * 2 {
        return Err(malformed);
    }
    Ok(TagReply {
        pc,
        xpc,
        uii: &reply[offset..],
    })
}

/// Memory image `PC UII` matched when selecting one tag by UII.
pub fn uii_mask(pc: u16, uii: &[u8]) -> Result<heapless::Vec<u8, { MAX_ID_LEN + 2 }>, PollError> {
    let overflow = |_| PollError::Internal("UII longer than 62 bytes");
    let mut mask = heapless::Vec::new();
    mask.extend_from_slice(&pc.to_be_bytes()).map_err(overflow)?;
    mask.extend_from_slice(uii).map_err(overflow)?;
    Ok(mask)
}

/// Split a mask into Select chunks: `(pointer, bytes)` per command.
pub fn select_chunks(mask: &[u8]) -> impl Iterator<Item = (u32, &[u8])> {
    mask.chunks(SELECT_CHUNK_BITS / 8)
        .enumerate()
        .map(|(i, chunk)| (PC_POINTER + (i * SELECT_CHUNK_BITS) as u32, chunk))
}

// ─── Inventory result stream ────────────────────────────────────────

const STATUS_DATA: u8 = 0;
const STATUS_HANDLE: u8 = 1;
const STATUS_TIMEOUT: u8 = 2;
const STATUS_COLLISION: u8 = 3;

/// One slot of an inventory result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotResult<'a> {
    /// Single reply: PC/XPC/UII bytes and, when requested, the tag handle.
    Tag {
        reply: &'a [u8],
        handle: Option<u16>,
    },
    Timeout,
    Collision,
}

/// Iterator over the entries of one inventory result chunk.
///
/// Yields one `Err(Internal)` on a malformed entry and stops.
#[derive(Debug, Clone)]
pub struct SlotResults<'a> {
    data: &'a [u8],
}

impl<'a> SlotResults<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn next_entry(&mut self) -> Result<SlotResult<'a>, PollError> {
        let malformed = PollError::Internal("malformed inventory result");
        let status = self.data[0];
        match status {
            STATUS_TIMEOUT | STATUS_COLLISION => {
                self.data = &self.data[1..];
                Ok(if status == STATUS_TIMEOUT {
                    SlotResult::Timeout
                } else {
                    SlotResult::Collision
                })
            }
            STATUS_DATA | STATUS_HANDLE => {
                let (len, last_bits) = match self.data.get(1..3) {
                    Some(&[len, last_bits]) => (len as usize, last_bits),
                    _ => return Err(malformed),
                };
                let body = self.data.get(3..3 + len).ok_or(malformed.clone())?;
                if last_bits > 7 || (last_bits != 0 && status == STATUS_HANDLE) {
                    return Err(malformed);
                }
                self.data = &self.data[3 + len..];
                if status == STATUS_DATA {
                    return Ok(SlotResult::Tag {
                        reply: body,
                        handle: None,
                    });
                }
                if body.len() < 2 {
                    return Err(malformed);
                }
                let (reply, handle) = body.split_at(body.len() - 2);
                Ok(SlotResult::Tag {
                    reply,
                    handle: Some(u16::from_be_bytes([handle[0], handle[1]])),
                })
            }
            _ => Err(malformed),
        }
    }
}

impl<'a> Iterator for SlotResults<'a> {
    type Item = Result<SlotResult<'a>, PollError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let entry = self.next_entry();
        if entry.is_err() {
            self.data = &[];
        }
        Some(entry)
    }
}
