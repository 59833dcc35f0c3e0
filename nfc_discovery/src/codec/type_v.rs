//! ISO15693 frame codec.
//!
//! UIDs are 8 bytes, transmitted LSB first. Inventory masks are compared
//! against the UID read as a little-endian `u64`, starting at bit 0.

use crate::error::PollError;

// ─── Request flags ──────────────────────────────────────────────────

pub const FLAG_HIGH_RATE: u8 = 0x02;
pub const FLAG_INVENTORY: u8 = 0x04;
/// Inventory: AFI field present.
pub const FLAG_AFI: u8 = 0x10;
/// Inventory: single slot instead of 16.
pub const FLAG_ONE_SLOT: u8 = 0x20;
/// Non-inventory: request addressed to one UID.
pub const FLAG_ADDRESS: u8 = 0x20;
/// Response: error flag.
pub const FLAG_ERROR: u8 = 0x01;

// ─── Command codes ──────────────────────────────────────────────────

pub const CMD_INVENTORY: u8 = 0x01;
pub const CMD_STAY_QUIET: u8 = 0x02;
pub const CMD_SELECT: u8 = 0x25;

/// UID length in bytes.
pub const UID_LEN: usize = 8;
/// Longest mask that still leaves room for a 4-bit slot number.
pub const MAX_MASK_LEN: u8 = 60;

/// Inventory mask: the low `len` bits of `value` must match the UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InventoryMask {
    pub value: u64,
    pub len: u8,
}

impl InventoryMask {
    /// Append a slot nibble, producing the mask of the next round.
    pub fn extend(self, slot: u8) -> Result<Self, PollError> {
        if self.len + 4 > MAX_MASK_LEN {
            return Err(PollError::Protocol("inventory mask exhausted"));
        }
        Ok(Self {
            value: self.value | (u64::from(slot & 0x0F) << self.len),
            len: self.len + 4,
        })
    }

    /// Whether `uid` matches this mask.
    pub fn matches(&self, uid: &[u8; UID_LEN]) -> bool {
        let mask = if self.len >= 64 {
            u64::MAX
        } else {
            (1u64 << self.len) - 1
        };
        u64::from_le_bytes(*uid) & mask == self.value & mask
    }
}

/// Slot a UID answers in during a 16-slot inventory with `mask_len` bits.
#[inline]
pub fn slot_of(uid: &[u8; UID_LEN], mask_len: u8) -> u8 {
    ((u64::from_le_bytes(*uid) >> mask_len) & 0x0F) as u8
}

/// Inventory request.
pub fn inventory(
    afi: Option<u8>,
    one_slot: bool,
    mask: &InventoryMask,
) -> Result<heapless::Vec<u8, 12>, PollError> {
    let mut flags = FLAG_HIGH_RATE | FLAG_INVENTORY;
    if afi.is_some() {
        flags |= FLAG_AFI;
    }
    if one_slot {
        flags |= FLAG_ONE_SLOT;
    }

    const OVERFLOW: PollError = PollError::Internal("inventory frame overflow");
    let mut frame = heapless::Vec::new();
    frame.extend_from_slice(&[flags, CMD_INVENTORY]).map_err(|_| OVERFLOW)?;
    if let Some(afi) = afi {
        frame.push(afi).map_err(|_| OVERFLOW)?;
    }
    frame.push(mask.len).map_err(|_| OVERFLOW)?;
    let mask_bytes = (mask.len as usize).div_ceil(8);
    frame
        .extend_from_slice(&mask.value.to_le_bytes()[..mask_bytes])
        .map_err(|_| OVERFLOW)?;
    Ok(frame)
}

/// Addressed Select.
pub fn select(uid: &[u8; UID_LEN]) -> [u8; 10] {
    addressed(CMD_SELECT, uid)
}

/// Addressed Stay Quiet (no response).
pub fn stay_quiet(uid: &[u8; UID_LEN]) -> [u8; 10] {
    addressed(CMD_STAY_QUIET, uid)
}

fn addressed(cmd: u8, uid: &[u8; UID_LEN]) -> [u8; 10] {
    let mut frame = [0u8; 10];
    frame[0] = FLAG_HIGH_RATE | FLAG_ADDRESS;
    frame[1] = cmd;
    frame[2..].copy_from_slice(uid);
    frame
}

/// Inventory response `[flags, dsfid, uid(8)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryResponse {
    pub dsfid: u8,
    pub uid: [u8; UID_LEN],
}

impl InventoryResponse {
    pub fn parse(rx: &[u8]) -> Result<Self, PollError> {
        if rx.len() != 2 + UID_LEN {
            return Err(PollError::Protocol("inventory response length"));
        }
        if rx[0] & FLAG_ERROR != 0 {
            return Err(PollError::Protocol("inventory error flag"));
        }
        let mut uid = [0u8; UID_LEN];
        uid.copy_from_slice(&rx[2..]);
        Ok(Self { dsfid: rx[1], uid })
    }
}

/// Generic response check: first byte is the flags byte, error flag clear.
pub fn check_response(rx: &[u8]) -> Result<(), PollError> {
    match rx.first() {
        Some(flags) if flags & FLAG_ERROR == 0 => Ok(()),
        Some(_) => Err(PollError::Protocol("response error flag")),
        None => Err(PollError::Protocol("empty response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID: [u8; 8] = [0x21, 0x43, 0x65, 0x87, 0x00, 0x01, 0x04, 0xE0];

    #[test]
    fn test_inventory_frames() {
        let frame = inventory(None, true, &InventoryMask::default()).unwrap();
        assert_eq!(frame.as_slice(), &[0x26, 0x01, 0x00]);

        let mask = InventoryMask { value: 0x321, len: 12 };
        let frame = inventory(Some(0x07), false, &mask).unwrap();
        assert_eq!(frame.as_slice(), &[0x16, 0x01, 0x07, 12, 0x21, 0x03]);

        // Longest frame: AFI plus a full-length mask.
        let mask = InventoryMask { value: 0x0FED_CBA9_8765_4321, len: MAX_MASK_LEN };
        let frame = inventory(Some(0x07), false, &mask).unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[4..], &mask.value.to_le_bytes());
    }

    #[test]
    fn test_mask_extend_and_match() {
        let mask = InventoryMask::default().extend(0x1).unwrap();
        assert_eq!(mask, InventoryMask { value: 0x1, len: 4 });
        assert!(mask.matches(&UID));
        let mask = mask.extend(0x2).unwrap();
        assert!(mask.matches(&UID));
        let other = InventoryMask::default().extend(0x3).unwrap();
        assert!(!other.matches(&UID));

        let full = InventoryMask { value: 0, len: 60 };
        assert!(full.extend(0).is_err());
    }

    #[test]
    fn test_slot_of() {
        assert_eq!(slot_of(&UID, 0), 0x1);
        assert_eq!(slot_of(&UID, 4), 0x2);
        assert_eq!(slot_of(&UID, 60), 0xE);
    }

    #[test]
    fn test_addressed_frames() {
        let frame = select(&UID);
        assert_eq!(&frame[..2], &[0x22, 0x25]);
        assert_eq!(&frame[2..], &UID);
        assert_eq!(stay_quiet(&UID)[1], 0x02);
    }

    #[test]
    fn test_response_parsing() {
        let mut rx = [0u8; 10];
        rx[1] = 0x11;
        rx[2..].copy_from_slice(&UID);
        let resp = InventoryResponse::parse(&rx).unwrap();
        assert_eq!(resp.dsfid, 0x11);
        assert_eq!(resp.uid, UID);

        rx[0] = FLAG_ERROR;
        assert!(InventoryResponse::parse(&rx).is_err());
        assert!(InventoryResponse::parse(&rx[..5]).is_err());

        assert!(check_response(&[0x00]).is_ok());
        assert!(check_response(&[0x01, 0x0F]).is_err());
        assert!(check_response(&[]).is_err());
    }
}
