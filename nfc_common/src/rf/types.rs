//! RF frame and configuration types.
//!
//! - `TxFrame` / `RxFrame` - Outgoing and incoming frames (CRC excluded)
//! - `CollisionInfo` - Bits received before the first colliding bit
//! - `RfConfig` - Protocol and CRC settings applied before an exchange
//! - `InventoryResult` - One chunk of an ISO18000-3M3 inventory result stream

use crate::consts::{MAX_FRAME_LEN, MAX_INVENTORY_RESULT_LEN};
use crate::rf::transceiver::RfError;
use serde::{Deserialize, Serialize};

/// Fixed-capacity frame buffer.
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Fixed-capacity inventory result buffer.
pub type InventoryBuf = heapless::Vec<u8, MAX_INVENTORY_RESULT_LEN>;

/// RF protocol the front end is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Protocol {
    /// ISO14443-3A, 106 kbit/s.
    Iso14443a = 0,
    /// ISO14443-3B, 106 kbit/s.
    Iso14443b = 1,
    /// ISO15693, high data rate.
    Iso15693 = 2,
    /// ISO18000-3 Mode 3.
    I18000p3m3 = 3,
}

/// Front-end configuration applied with `Transceiver::set_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfConfig {
    /// Active protocol.
    pub protocol: Protocol,
    /// Append CRC to transmitted frames.
    pub crc_tx: bool,
    /// Verify and strip CRC from received frames.
    pub crc_rx: bool,
    /// Response timeout [us].
    pub timeout_us: u32,
}

impl RfConfig {
    /// Protocol defaults: CRC on in both directions.
    pub const fn new(protocol: Protocol, timeout_us: u32) -> Self {
        Self {
            protocol,
            crc_tx: true,
            crc_rx: true,
            timeout_us,
        }
    }

    /// Override CRC handling.
    pub const fn with_crc(mut self, tx: bool, rx: bool) -> Self {
        self.crc_tx = tx;
        self.crc_rx = rx;
        self
    }
}

/// Time unit for `Transceiver::wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUnit {
    Microseconds,
    Milliseconds,
}

impl WaitUnit {
    /// Convert a duration in this unit to microseconds.
    pub const fn to_micros(self, duration: u32) -> u64 {
        match self {
            Self::Microseconds => duration as u64,
            Self::Milliseconds => duration as u64 * 1000,
        }
    }
}

/// Outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFrame<'a> {
    /// Whole bytes (CRC handled by the front end).
    Bytes(&'a [u8]),
    /// Bit-oriented frame: `last_bits` valid bits in the final byte (0 = all 8).
    ///
    /// The reception following a bit frame is aligned: received bits start
    /// at the bit position where the transmitted partial byte ended.
    Bits { data: &'a [u8], last_bits: u8 },
    /// ISO15693 end-of-frame, advancing to the next inventory slot.
    Eof,
}

/// Incoming frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RxFrame {
    /// Received bytes (CRC stripped when `crc_rx` is enabled).
    pub data: FrameBuf,
    /// Valid bits in the final byte (0 = all 8).
    pub last_bits: u8,
}

impl RxFrame {
    /// Build a whole-byte frame.
    ///
    /// # Errors
    /// `RfError::Framing` if `bytes` is longer than `MAX_FRAME_LEN`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RfError> {
        let data = FrameBuf::from_slice(bytes).map_err(|_| RfError::Framing)?;
        Ok(Self { data, last_bits: 0 })
    }

    /// Total number of valid bits, counted from bit 0 of `data[0]`.
    pub fn bit_len(&self) -> usize {
        match (self.data.len(), self.last_bits) {
            (0, _) => 0,
            (n, 0) => n * 8,
            (n, bits) => (n - 1) * 8 + bits as usize,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Bits received before a collision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollisionInfo {
    /// Received bytes; only bits below `bit_pos` are meaningful.
    pub frame: RxFrame,
    /// Position of the first colliding bit, counted from bit 0 (LSB) of
    /// `frame.data[0]`, alignment bits included.
    pub bit_pos: usize,
}

/// Option for a hardware-assisted ISO18000-3M3 inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryOption {
    /// Acknowledge single replies and report their PC/UII.
    Normal,
    /// Additionally request a handle (Req_RN) from a single replying tag.
    GetHandle,
}

/// One chunk of an ISO18000-3M3 inventory result stream.
///
/// Entry layout: `[status][len][valid_bits_in_last][data..]` for status 0
/// (tag reply) and 1 (tag reply followed by a 16-bit handle); a single
/// status byte for 2 (no reply) and 3 (collision).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryResult {
    /// Result bytes; entries are never split across chunks.
    pub data: InventoryBuf,
    /// More slot results are pending; fetch them with `resume_inventory`.
    pub more: bool,
}
