//! ISO14443-3B / 14443-4B frame codec.

use crate::error::PollError;

/// Anticollision prefix byte of REQB/WUPB and slot markers.
pub const APF: u8 = 0x05;
/// First byte of ATQB and HLTB.
pub const ATQB_TAG: u8 = 0x50;
/// ATTRIB command byte.
pub const ATTRIB: u8 = 0x1D;
/// Largest slot-count exponent: 2^4 = 16 slots.
pub const MAX_SLOT_EXPONENT: u8 = 4;

const PARAM_WUPB: u8 = 0x08;

/// REQB (`wakeup = false`) or WUPB (`wakeup = true`) announcing `2^k` slots.
pub fn request(afi: u8, k: u8, wakeup: bool) -> Result<[u8; 3], PollError> {
    if k > MAX_SLOT_EXPONENT {
        return Err(PollError::Internal("slot exponent above 4"));
    }
    let param = (if wakeup { PARAM_WUPB } else { 0 }) | k;
    Ok([APF, afi, param])
}

/// Slot marker for slot number 2..=16.
pub fn slot_marker(slot: u8) -> Result<[u8; 1], PollError> {
    match slot {
        2..=16 => Ok([((slot - 1) << 4) | APF]),
        _ => Err(PollError::Internal("slot number out of range")),
    }
}

/// Parsed answer to request B.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atqb {
    pub pupi: [u8; 4],
    pub app_data: [u8; 4],
    /// Protocol info (3 bytes, 4 with the extended ATQB).
    pub protocol_info: heapless::Vec<u8, 4>,
}

impl Atqb {
    /// Parse a 12- or 13-byte ATQB.
    pub fn parse(rx: &[u8]) -> Result<Self, PollError> {
        if !(rx.len() == 12 || rx.len() == 13) {
            return Err(PollError::Protocol("ATQB length"));
        }
        if rx[0] != ATQB_TAG {
            return Err(PollError::Protocol("ATQB tag byte"));
        }
        let mut pupi = [0u8; 4];
        pupi.copy_from_slice(&rx[1..5]);
        let mut app_data = [0u8; 4];
        app_data.copy_from_slice(&rx[5..9]);
        let protocol_info = heapless::Vec::from_slice(&rx[9..])
            .map_err(|_| PollError::Internal("ATQB protocol info overflow"))?;
        Ok(Self {
            pupi,
            app_data,
            protocol_info,
        })
    }

    /// Maximum frame size code (protocol info byte 1, high nibble).
    #[inline]
    pub fn fsci(&self) -> u8 {
        self.protocol_info.get(1).map_or(0, |b| b >> 4)
    }
}

/// HLTB for one PUPI.
#[inline]
pub const fn hltb(pupi: &[u8; 4]) -> [u8; 5] {
    [ATQB_TAG, pupi[0], pupi[1], pupi[2], pupi[3]]
}

/// Validate the HLTB answer (`00`).
pub fn check_hltb_answer(rx: &[u8]) -> Result<(), PollError> {
    match rx {
        [0x00] => Ok(()),
        _ => Err(PollError::Protocol("HLTB answer")),
    }
}

/// ATTRIB parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttribParams {
    pub fsdi: u8,
    pub cid: u8,
    pub dri: u8,
    pub dsi: u8,
}

/// ATTRIB: `1D PUPI(4) P1 P2 P3 P4`.
///
/// P1 = 0 (default TR0/TR1, SOF/EOF required), P2 = `DSI DRI FSDI`,
/// P3 = ISO14443-4 compliant, P4 = CID.
pub const fn attrib(pupi: &[u8; 4], params: &AttribParams) -> [u8; 9] {
    let p2 = ((params.dsi & 0x03) << 6) | ((params.dri & 0x03) << 4) | (params.fsdi & 0x0F);
    [
        ATTRIB,
        pupi[0],
        pupi[1],
        pupi[2],
        pupi[3],
        0x00,
        p2,
        0x01,
        params.cid & 0x0F,
    ]
}

/// Parse the ATTRIB answer, returning `(mbli, cid)`.
pub fn parse_attrib_answer(rx: &[u8]) -> Result<(u8, u8), PollError> {
    match rx.first() {
        Some(&b) => Ok((b >> 4, b & 0x0F)),
        None => Err(PollError::Protocol("empty ATTRIB answer")),
    }
}
