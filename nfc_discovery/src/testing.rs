//! Scripted transceiver for engine unit tests.
//!
//! Each expected exchange is checked against the outgoing frame and answered
//! with a canned reply. Running past the end of the script or sending an
//! unexpected frame panics with the offending frame.

use nfc_common::consts::MAX_FRAME_LEN;
use nfc_common::rf::transceiver::{RfError, Transceiver};
use nfc_common::rf::types::{
    CollisionInfo, FrameBuf, InventoryBuf, InventoryOption, InventoryResult, RfConfig, RxFrame,
    TxFrame, WaitUnit,
};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expected {
    /// Frame bytes and valid bits in the final byte (0 = all 8).
    Frame(Vec<u8>, u8),
    Eof,
    Inventory {
        select: Option<Vec<u8>>,
        begin_round: Vec<u8>,
        option: InventoryOption,
    },
    Resume,
}

#[derive(Debug, Clone)]
enum Reply {
    Frame(Result<RxFrame, RfError>),
    Inventory(Result<InventoryResult, RfError>),
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedTransceiver {
    script: VecDeque<(Expected, Reply)>,
    pub waits_us: Vec<u64>,
    pub configs: Vec<RfConfig>,
    pub field_cycles: u32,
}

impl ScriptedTransceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole-byte frame answered with whole-byte `reply`.
    pub fn expect(&mut self, tx: &[u8], reply: &[u8]) -> &mut Self {
        self.push(
            Expected::Frame(tx.to_vec(), 0),
            Reply::Frame(RxFrame::from_bytes(reply)),
        )
    }

    /// Frame (bytes or bits) answered with an arbitrary result.
    pub fn expect_bits(
        &mut self,
        tx: &[u8],
        last_bits: u8,
        reply: Result<RxFrame, RfError>,
    ) -> &mut Self {
        self.push(Expected::Frame(tx.to_vec(), last_bits), Reply::Frame(reply))
    }

    /// Whole-byte frame answered with an error status.
    pub fn expect_err(&mut self, tx: &[u8], err: RfError) -> &mut Self {
        self.push(Expected::Frame(tx.to_vec(), 0), Reply::Frame(Err(err)))
    }

    pub fn expect_eof(&mut self, reply: Result<RxFrame, RfError>) -> &mut Self {
        self.push(Expected::Eof, Reply::Frame(reply))
    }

    pub fn expect_inventory(
        &mut self,
        select: Option<&[u8]>,
        begin_round: &[u8],
        option: InventoryOption,
        reply: Result<InventoryResult, RfError>,
    ) -> &mut Self {
        self.push(
            Expected::Inventory {
                select: select.map(<[u8]>::to_vec),
                begin_round: begin_round.to_vec(),
                option,
            },
            Reply::Inventory(reply),
        )
    }

    pub fn expect_resume(&mut self, reply: Result<InventoryResult, RfError>) -> &mut Self {
        self.push(Expected::Resume, Reply::Inventory(reply))
    }

    fn push(&mut self, expected: Expected, reply: Reply) -> &mut Self {
        self.script.push_back((expected, reply));
        self
    }

    /// Panics unless every scripted exchange happened.
    pub fn finish(&self) {
        assert!(
            self.script.is_empty(),
            "unconsumed script entries: {:?}",
            self.script.iter().map(|(e, _)| e).collect::<Vec<_>>()
        );
    }

    fn next(&mut self, actual: Expected) -> Reply {
        let (expected, reply) = self
            .script
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected exchange past end of script: {actual:x?}"));
        assert_eq!(expected, actual, "scripted exchange mismatch");
        reply
    }
}

/// Reply of `bits` valid bits counted from bit 0 of `data[0]`.
pub(crate) fn partial(data: &[u8], bits: usize) -> RxFrame {
    RxFrame {
        data: FrameBuf::from_slice(&data[..bits.div_ceil(8).min(MAX_FRAME_LEN)]).unwrap(),
        last_bits: (bits % 8) as u8,
    }
}

/// Collision status after `bit_pos` valid bits.
pub(crate) fn collision(data: &[u8], bit_pos: usize) -> RfError {
    RfError::Collision(CollisionInfo {
        frame: partial(data, bit_pos.max(1)),
        bit_pos,
    })
}

/// Inventory result chunk.
pub(crate) fn inventory(data: &[u8], more: bool) -> InventoryResult {
    InventoryResult {
        data: InventoryBuf::from_slice(data).unwrap(),
        more,
    }
}

impl Transceiver for ScriptedTransceiver {
    fn exchange(&mut self, tx: &TxFrame<'_>) -> Result<RxFrame, RfError> {
        let actual = match tx {
            TxFrame::Bytes(data) => Expected::Frame(data.to_vec(), 0),
            TxFrame::Bits { data, last_bits } => Expected::Frame(data.to_vec(), *last_bits),
            TxFrame::Eof => Expected::Eof,
        };
        match self.next(actual) {
            Reply::Frame(reply) => reply,
            Reply::Inventory(_) => panic!("inventory reply scripted for a frame exchange"),
        }
    }

    fn field_on(&mut self) -> Result<(), RfError> {
        self.field_cycles += 1;
        Ok(())
    }

    fn field_off(&mut self) -> Result<(), RfError> {
        Ok(())
    }

    fn wait(&mut self, unit: WaitUnit, duration: u32) -> Result<(), RfError> {
        self.waits_us.push(unit.to_micros(duration));
        Ok(())
    }

    fn set_config(&mut self, config: RfConfig) -> Result<(), RfError> {
        self.configs.push(config);
        Ok(())
    }

    fn i18000p3m3_inventory(
        &mut self,
        select: Option<(&[u8], u8)>,
        begin_round: (&[u8], u8),
        option: InventoryOption,
    ) -> Result<InventoryResult, RfError> {
        let actual = Expected::Inventory {
            select: select.map(|(bytes, _)| bytes.to_vec()),
            begin_round: begin_round.0.to_vec(),
            option,
        };
        match self.next(actual) {
            Reply::Inventory(reply) => reply,
            Reply::Frame(_) => panic!("frame reply scripted for an inventory"),
        }
    }

    fn i18000p3m3_resume_inventory(&mut self) -> Result<InventoryResult, RfError> {
        match self.next(Expected::Resume) {
            Reply::Inventory(reply) => reply,
            Reply::Frame(_) => panic!("frame reply scripted for a resume"),
        }
    }
}
