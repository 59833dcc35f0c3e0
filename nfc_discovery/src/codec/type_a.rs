//! ISO14443-3A / 14443-4A / NFC-DEP frame codec.
//!
//! Anticollision works on the 5-byte CLn field of one cascade level
//! (`UID0..UID3` + `BCC`, or `CT` + 3 UID bytes + `BCC`). Bits are counted
//! LSB first from byte 0 of that field.

use crate::error::PollError;
use nfc_common::consts::MAX_UID_A_LEN;

// ─── Command codes ──────────────────────────────────────────────────

/// REQA short frame (7 bits).
pub const REQA: u8 = 0x26;
/// WUPA short frame (7 bits).
pub const WUPA: u8 = 0x52;
/// Short frame length in bits.
pub const SHORT_FRAME_BITS: u8 = 7;
/// HLTA (CRC appended by the front end).
pub const HLTA: [u8; 2] = [0x50, 0x00];
/// Cascade tag marking an incomplete UID in CLn byte 0.
pub const CASCADE_TAG: u8 = 0x88;
/// NVB of a SELECT command (all 40 bits known).
pub const NVB_SELECT: u8 = 0x70;
/// RATS start byte.
pub const RATS: u8 = 0xE0;
/// NFC-DEP start byte (SB) in front of every NFC-DEP frame on Type A.
pub const NFC_DEP_SB: u8 = 0xF0;

/// Bits in one CLn field.
pub const CL_BITS: usize = 40;

const SEL_CODES: [u8; 3] = [0x93, 0x95, 0x97];

const SAK_UID_INCOMPLETE: u8 = 0x04;
const SAK_PROTOCOL_MASK: u8 = 0x60;

// ─── Cascade helpers ────────────────────────────────────────────────

/// SEL code for cascade level 1..=3.
pub fn sel_code(level: u8) -> Result<u8, PollError> {
    match level {
        1..=3 => Ok(SEL_CODES[level as usize - 1]),
        _ => Err(PollError::Protocol("cascade level beyond 3")),
    }
}

/// Number of valid bits (NVB) for an anticollision frame carrying
/// `known_bits` bits of the CLn field.
///
/// High nibble: whole bytes including SEL and NVB. Low nibble: extra bits.
#[inline]
pub const fn nvb(known_bits: usize) -> u8 {
    (((2 + known_bits / 8) << 4) | (known_bits % 8)) as u8
}

/// Block check character over 4 bytes.
#[inline]
pub fn bcc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// CLn BCC check.
#[inline]
pub fn bcc_valid(cl: &[u8; 5]) -> bool {
    bcc(&cl[..4]) == cl[4]
}

/// Anticollision frame: `SEL NVB` followed by the known prefix of the CLn
/// field, the last byte truncated to its known bits.
///
/// Returns the frame and the number of valid bits in its final byte
/// (0 = all 8).
pub fn anticollision_frame(
    level: u8,
    cl: &[u8; 5],
    known_bits: usize,
) -> Result<(heapless::Vec<u8, 7>, u8), PollError> {
    if known_bits >= CL_BITS {
        return Err(PollError::Internal("anticollision with complete CLn"));
    }
    let mut frame = heapless::Vec::new();
    let push = |frame: &mut heapless::Vec<u8, 7>, b: u8| {
        frame
            .push(b)
            .map_err(|_| PollError::Internal("anticollision frame overflow"))
    };
    push(&mut frame, sel_code(level)?)?;
    push(&mut frame, nvb(known_bits))?;

    let whole = known_bits / 8;
    let extra = known_bits % 8;
    for &b in &cl[..whole] {
        push(&mut frame, b)?;
    }
    if extra > 0 {
        push(&mut frame, cl[whole] & ((1u8 << extra) - 1))?;
    }
    Ok((frame, extra as u8))
}

/// Merge an aligned anticollision reply into the CLn field.
///
/// The reply starts at bit `known_bits % 8` of its first byte (the bits
/// below are alignment); `rx_bits` counts valid bits from bit 0 of `rx[0]`,
/// alignment included. Returns the new number of known bits.
pub fn merge_reply(cl: &mut [u8; 5], known_bits: usize, rx: &[u8], rx_bits: usize) -> usize {
    let base = (known_bits / 8) * 8;
    let start = known_bits % 8;
    let end = rx_bits.min(rx.len() * 8);

    let mut known = known_bits;
    for pos in start..end {
        let global = base + pos;
        if global >= CL_BITS {
            break;
        }
        let bit = (rx[pos / 8] >> (pos % 8)) & 1;
        set_bit(cl, global, bit == 1);
        known = global + 1;
    }
    known
}

/// Set or clear bit `pos` of the CLn field.
#[inline]
pub fn set_bit(cl: &mut [u8; 5], pos: usize, value: bool) {
    let mask = 1u8 << (pos % 8);
    if value {
        cl[pos / 8] |= mask;
    } else {
        cl[pos / 8] &= !mask;
    }
}

/// SELECT frame for a complete CLn field.
pub fn select_frame(level: u8, cl: &[u8; 5]) -> Result<[u8; 7], PollError> {
    Ok([
        sel_code(level)?,
        NVB_SELECT,
        cl[0],
        cl[1],
        cl[2],
        cl[3],
        cl[4],
    ])
}

/// CLn fields needed to select a known UID (4, 7 or 10 bytes).
pub fn cascade_fields(uid: &[u8]) -> Result<heapless::Vec<[u8; 5], 3>, PollError> {
    let mut fields = heapless::Vec::new();
    let levels = match uid.len() {
        4 => 1,
        7 => 2,
        10 => 3,
        _ => return Err(PollError::Internal("Type A UID length")),
    };

    let mut rest = uid;
    for level in 1..=levels {
        let mut cl = [0u8; 5];
        if level < levels {
            cl[0] = CASCADE_TAG;
            cl[1..4].copy_from_slice(&rest[..3]);
            rest = &rest[3..];
        } else {
            cl[..4].copy_from_slice(&rest[..4]);
        }
        cl[4] = bcc(&cl[..4]);
        fields
            .push(cl)
            .map_err(|_| PollError::Internal("cascade overflow"))?;
    }
    Ok(fields)
}

// ─── Replies ────────────────────────────────────────────────────────

/// ATQA as received (LSB byte first).
pub fn parse_atqa(rx: &[u8]) -> Result<[u8; 2], PollError> {
    match rx {
        [lo, hi] => Ok([*lo, *hi]),
        _ => Err(PollError::Protocol("ATQA length")),
    }
}

/// SAK byte.
pub fn parse_sak(rx: &[u8]) -> Result<u8, PollError> {
    match rx {
        [sak] => Ok(*sak),
        _ => Err(PollError::Protocol("SAK length")),
    }
}

/// SAK bit 3: the UID continues at the next cascade level.
#[inline]
pub const fn sak_uid_incomplete(sak: u8) -> bool {
    sak & SAK_UID_INCOMPLETE != 0
}

/// Protocol advertised by a final SAK (bits 6 and 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SakProtocol {
    /// No ISO14443-4 / NFC-DEP support (e.g. MIFARE Classic, Type 2).
    Plain,
    /// ISO14443-4 (Type 4A).
    IsoDep,
    /// NFC-DEP (P2P target).
    NfcDep,
    /// Both bits set: the caller must pick a protocol.
    Merged,
}

#[inline]
pub const fn classify_sak(sak: u8) -> SakProtocol {
    match sak & SAK_PROTOCOL_MASK {
        0x20 => SakProtocol::IsoDep,
        0x40 => SakProtocol::NfcDep,
        0x60 => SakProtocol::Merged,
        _ => SakProtocol::Plain,
    }
}

// ─── ISO14443-4A / NFC-DEP activation ───────────────────────────────

/// RATS frame.
#[inline]
pub const fn rats(fsdi: u8, cid: u8) -> [u8; 2] {
    [RATS, ((fsdi & 0x0F) << 4) | (cid & 0x0F)]
}

/// Validate an ATS: TL (byte 0) equals the frame length.
pub fn check_ats(rx: &[u8]) -> Result<(), PollError> {
    match rx.first() {
        Some(&tl) if tl as usize == rx.len() => Ok(()),
        _ => Err(PollError::Protocol("ATS length byte mismatch")),
    }
}

/// ATR_REQ with start byte:
/// `F0 LEN D4 00 NFCID3(10) DID BS BR PP [Gi]`.
pub fn atr_req(nfcid3: &[u8; 10], general_bytes: &[u8]) -> Result<heapless::Vec<u8, 68>, PollError> {
    let len = 17 + general_bytes.len();
    if len > 64 {
        return Err(PollError::Internal("ATR_REQ general bytes too long"));
    }
    let pp = 0x30 | if general_bytes.is_empty() { 0x00 } else { 0x02 };

    let overflow = |_| PollError::Internal("ATR_REQ overflow");
    let mut frame = heapless::Vec::new();
    frame
        .extend_from_slice(&[NFC_DEP_SB, len as u8, 0xD4, 0x00])
        .map_err(overflow)?;
    frame.extend_from_slice(nfcid3).map_err(overflow)?;
    // DID 0, no bit-rate change, LR 254 bytes
    frame
        .extend_from_slice(&[0x00, 0x00, 0x00, pp])
        .map_err(overflow)?;
    frame.extend_from_slice(general_bytes).map_err(overflow)?;
    Ok(frame)
}

/// Validate an ATR_RES: `F0 LEN D5 01 NFCID3(10) DID BS BR TO PP [Gt]`.
pub fn check_atr_res(rx: &[u8]) -> Result<(), PollError> {
    if rx.len() < 19 || rx[0] != NFC_DEP_SB || rx[1] as usize != rx.len() - 1 {
        return Err(PollError::Protocol("ATR_RES length"));
    }
    if rx[2..4] != [0xD5, 0x01] {
        return Err(PollError::Protocol("ATR_RES command"));
    }
    Ok(())
}

/// UID buffer for a Type A tag under resolution.
pub type UidA = heapless::Vec<u8, MAX_UID_A_LEN>;
