//! ISO18000-3 Mode 3 tag model and command decoders.
//!
//! The UII bank is modelled as `CRC(16) PC(16) UII`; Select masks are
//! matched MSB first from their bit pointer into that image. Session flags
//! and SL follow the Select action table; a tag answering alone in a round
//! flips the inventoried flag of the round's session.

use super::slot_seed;
use nfc_common::config::ConfigError;
use nfc_common::consts::MAX_ID_LEN;
use nfc_discovery::codec::i18000p3m3::MEMBANK_UII;

const CMD_SELECT: u32 = 0b1010;
const CMD_BEGIN_ROUND: u32 = 0b1000;
const BEGIN_ROUND_BITS: usize = 17;
const TARGET_SL: u8 = 0b100;
const PC_XI: u16 = 0x0200;
const XPC_XEB: u16 = 0x8000;

// ─── Bit reader ─────────────────────────────────────────────────────

/// MSB-first reader over `(bytes, valid bits in the final byte)`.
struct BitReader<'a> {
    data: &'a [u8],
    len: usize,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8], last_bits: u8) -> Self {
        let len = match (data.len(), last_bits) {
            (0, _) => 0,
            (n, 0) => n * 8,
            (n, bits) => (n - 1) * 8 + usize::from(bits.min(8)),
        };
        Self { data, len, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.len - self.pos
    }

    fn bit(&mut self) -> Option<bool> {
        if self.pos >= self.len {
            return None;
        }
        let bit = (self.data[self.pos / 8] >> (7 - self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Some(bit)
    }

    fn bits(&mut self, count: u8) -> Option<u32> {
        (0..count).try_fold(0u32, |acc, _| Some((acc << 1) | u32::from(self.bit()?)))
    }

    /// Extensible bit vector: 8-bit groups, a set leading bit announcing another group.
    fn ebv(&mut self) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..5 {
            let group = self.bits(8)?;
            value = (value << 7) | (group & 0x7F);
            if group & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }
}

// ─── Commands ───────────────────────────────────────────────────────

/// Decoded Select command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectCommand {
    /// 0..=3 inventoried flag of that session, 4 SL.
    pub target: u8,
    pub action: u8,
    pub membank: u8,
    /// Bit address of the first mask bit.
    pub pointer: u32,
    pub mask: heapless::Vec<u8, 32>,
    pub mask_bits: usize,
    pub truncate: bool,
}

impl SelectCommand {
    /// Decode `1010 Target Action MemBank Pointer(EBV) Length Mask Truncate`.
    pub fn decode(data: &[u8], last_bits: u8) -> Option<Self> {
        let mut r = BitReader::new(data, last_bits);
        if r.bits(4)? != CMD_SELECT {
            return None;
        }
        let target = r.bits(3)? as u8;
        let action = r.bits(3)? as u8;
        let membank = r.bits(2)? as u8;
        let pointer = r.ebv()?;
        let mask_bits = r.bits(8)? as usize;
        let mut mask = heapless::Vec::new();
        for i in 0..mask_bits {
            if i % 8 == 0 {
                mask.push(0).ok()?;
            }
            if r.bit()? {
                let last = mask.len() - 1;
                mask[last] |= 0x80 >> (i % 8);
            }
        }
        let truncate = r.bit()?;
        if r.remaining() != 0 {
            return None;
        }
        Some(Self {
            target,
            action,
            membank,
            pointer,
            mask,
            mask_bits,
            truncate,
        })
    }
}

/// Decoded BeginRound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRound {
    /// 0/1 all tags, 2 tags with SL deasserted, 3 tags with SL asserted.
    pub sel: u8,
    pub session: u8,
    /// Inventoried flag value taking part (false = A).
    pub target_b: bool,
    pub q: u8,
}

impl BeginRound {
    /// Decode `1000 DR M TRext Sel Session Target Q`.
    pub fn decode(data: &[u8], last_bits: u8) -> Option<Self> {
        let mut r = BitReader::new(data, last_bits);
        if r.remaining() != BEGIN_ROUND_BITS || r.bits(4)? != CMD_BEGIN_ROUND {
            return None;
        }
        // DR, M, TRext
        r.bits(4)?;
        let sel = r.bits(2)? as u8;
        let session = r.bits(2)? as u8;
        let target_b = r.bit()?;
        let q = r.bits(4)? as u8;
        Some(Self {
            sel,
            session,
            target_b,
            q,
        })
    }
}

// ─── Tag ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I18000p3m3State {
    Ready,
    /// Answered alone in a round and was acknowledged.
    Acknowledged,
    /// Handed out its handle.
    Open,
}

#[derive(Debug, Clone)]
pub struct I18000p3m3Tag {
    pc: u16,
    xpc: heapless::Vec<u16, 2>,
    uii: heapless::Vec<u8, MAX_ID_LEN>,
    handle: u16,
    /// Inventoried flag per session (false = A).
    inventoried: [bool; 4],
    sl: bool,
    state: I18000p3m3State,
}

impl I18000p3m3Tag {
    /// Tag with a UII of whole 16-bit words and up to two XPC words.
    ///
    /// A two-word XPC needs XEB set in its first word, a one-word XPC
    /// needs it clear. Without `handle` one is derived from the UII.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` on a malformed UII or XPC.
    pub fn new(uii: &[u8], xpc: &[u16], handle: Option<u16>) -> Result<Self, ConfigError> {
        if uii.is_empty() || uii.len() % 2 != 0 || uii.len() > MAX_ID_LEN {
            return Err(ConfigError::ValidationError(format!(
                "UII {uii:02X?}: length must be 2..={MAX_ID_LEN} bytes of whole words"
            )));
        }
        let xeb = xpc.first().is_some_and(|w1| w1 & XPC_XEB != 0);
        if xpc.len() > 2 || (xpc.len() == 2) != xeb {
            return Err(ConfigError::ValidationError(format!(
                "XPC {xpc:04X?}: one word with XEB clear or two words with XEB set"
            )));
        }
        let words = (uii.len() / 2) as u16;
        let pc = (words << 11) | if xpc.is_empty() { 0 } else { PC_XI };
        let seed = slot_seed(uii);
        Ok(Self {
            pc,
            xpc: heapless::Vec::from_slice(xpc).unwrap_or_default(),
            uii: heapless::Vec::from_slice(uii).unwrap_or_default(),
            handle: handle.unwrap_or((seed >> 16) as u16),
            inventoried: [false; 4],
            sl: false,
            state: I18000p3m3State::Ready,
        })
    }

    pub fn uii(&self) -> &[u8] {
        &self.uii
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn state(&self) -> I18000p3m3State {
        self.state
    }

    /// Inventoried flag of `session` is B.
    pub fn inventoried_b(&self, session: u8) -> bool {
        self.inventoried[usize::from(session & 0x03)]
    }

    pub(crate) fn power_up(&mut self) {
        self.inventoried = [false; 4];
        self.sl = false;
        self.state = I18000p3m3State::Ready;
    }

    /// Bit `pos` of the UII bank image.
    fn bank_bit(&self, pos: usize) -> Option<bool> {
        let byte = match pos / 8 {
            0 | 1 => 0,
            2 => (self.pc >> 8) as u8,
            3 => self.pc as u8,
            n => *self.uii.get(n - 4)?,
        };
        Some((byte >> (7 - pos % 8)) & 1 == 1)
    }

    fn matches(&self, cmd: &SelectCommand) -> bool {
        if cmd.membank != MEMBANK_UII {
            return false;
        }
        let base = cmd.pointer as usize;
        (0..cmd.mask_bits).all(|i| {
            let want = (cmd.mask[i / 8] >> (7 - i % 8)) & 1 == 1;
            self.bank_bit(base + i) == Some(want)
        })
    }

    /// Apply a Select to the session flag or SL it targets.
    pub(crate) fn apply_select(&mut self, cmd: &SelectCommand) {
        // true = assert SL / inventoried A
        #[derive(Clone, Copy)]
        enum Op {
            Set(bool),
            Negate,
            Keep,
        }
        let (on_match, on_miss) = match cmd.action {
            0 => (Op::Set(true), Op::Set(false)),
            1 => (Op::Set(true), Op::Keep),
            2 => (Op::Keep, Op::Set(false)),
            3 => (Op::Negate, Op::Keep),
            4 => (Op::Set(false), Op::Set(true)),
            5 => (Op::Set(false), Op::Keep),
            6 => (Op::Keep, Op::Set(true)),
            _ => (Op::Keep, Op::Negate),
        };
        let op = if self.matches(cmd) { on_match } else { on_miss };
        let flag = match cmd.target {
            0..=3 => &mut self.inventoried[usize::from(cmd.target)],
            TARGET_SL => &mut self.sl,
            _ => return,
        };
        // SL is asserted when true; an inventoried flag is A when false
        let asserted_is = cmd.target == TARGET_SL;
        match op {
            Op::Set(assert) => *flag = if assert { asserted_is } else { !asserted_is },
            Op::Negate => *flag = !*flag,
            Op::Keep => {}
        }
        self.state = I18000p3m3State::Ready;
    }

    /// Whether the tag takes part in a round.
    pub(crate) fn participates(&self, round: &BeginRound) -> bool {
        let sel = match round.sel {
            2 => !self.sl,
            3 => self.sl,
            _ => true,
        };
        sel && self.inventoried_b(round.session) == round.target_b
    }

    /// Slot drawn for a round with `q`.
    pub(crate) fn slot(&self, q: u8) -> u32 {
        slot_seed(&self.uii) & ((1u32 << q) - 1)
    }

    /// `PC [XPC_W1 [XPC_W2]] UII`.
    pub(crate) fn reply(&self) -> Vec<u8> {
        let mut reply = Vec::with_capacity(2 + 2 * self.xpc.len() + self.uii.len());
        reply.extend_from_slice(&self.pc.to_be_bytes());
        for word in &self.xpc {
            reply.extend_from_slice(&word.to_be_bytes());
        }
        reply.extend_from_slice(&self.uii);
        reply
    }

    /// Acknowledged alone in a round of `session`: the inventoried flag flips.
    pub(crate) fn acknowledge(&mut self, session: u8, open: bool) {
        let flag = &mut self.inventoried[usize::from(session & 0x03)];
        *flag = !*flag;
        self.state = if open {
            I18000p3m3State::Open
        } else {
            I18000p3m3State::Acknowledged
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfc_discovery::codec::i18000p3m3::{
        self as codec, PC_POINTER, RoundTarget, SelectAction, SelectTarget,
    };

    fn tag(uii: &[u8]) -> I18000p3m3Tag {
        I18000p3m3Tag::new(uii, &[], None).unwrap()
    }

    fn decode(cmd: &codec::Command) -> SelectCommand {
        SelectCommand::decode(&cmd.0, cmd.1).unwrap()
    }

    #[test]
    fn test_select_decoding() {
        let cmd = codec::select(
            SelectTarget::S2,
            SelectAction::DeassertNonMatching,
            300,
            &[0xAB, 0xC0],
            10,
        )
        .unwrap();
        let select = decode(&cmd);
        assert_eq!(select.target, 2);
        assert_eq!(select.action, 2);
        assert_eq!(select.membank, MEMBANK_UII);
        assert_eq!(select.pointer, 300);
        assert_eq!(select.mask_bits, 10);
        assert_eq!(select.mask.as_slice(), &[0xAB, 0xC0]);
        assert!(!select.truncate);

        assert!(SelectCommand::decode(&cmd.0[..cmd.0.len() - 1], 0).is_none());
    }

    #[test]
    fn test_begin_round_decoding() {
        let cmd = codec::begin_round(3, RoundTarget::B, 9).unwrap();
        let round = BeginRound::decode(&cmd.0, cmd.1).unwrap();
        assert_eq!(round.session, 3);
        assert!(round.target_b);
        assert_eq!(round.q, 9);
        assert_eq!(round.sel, 0);
    }

    #[test]
    fn test_pc_and_reply() {
        let t = I18000p3m3Tag::new(&[1, 2, 3, 4], &[0x1234], Some(0xBEEF)).unwrap();
        assert_eq!(t.pc(), 0x1200);
        assert_eq!(t.handle(), 0xBEEF);
        let reply = t.reply();
        let parsed = codec::parse_tag_reply(&reply).unwrap();
        assert_eq!(parsed.uii, &[1, 2, 3, 4]);
        assert_eq!(parsed.xpc.as_slice(), &[0x1234]);

        assert!(I18000p3m3Tag::new(&[1, 2, 3], &[], None).is_err());
        assert!(I18000p3m3Tag::new(&[1, 2], &[0x8000], None).is_err());
        assert!(I18000p3m3Tag::new(&[1, 2], &[0x8000, 0x0001], None).is_ok());
    }

    #[test]
    fn test_select_by_uii_mask() {
        let mut a = tag(&[0xE2, 0x00, 0x00, 0x01]);
        let mut b = tag(&[0xE2, 0x00, 0x00, 0x02]);
        let mask = codec::uii_mask(a.pc(), a.uii()).unwrap();
        let cmd = codec::select(
            SelectTarget::S0,
            SelectAction::AssertDeassert,
            PC_POINTER,
            &mask,
            mask.len() * 8,
        )
        .unwrap();
        let select = decode(&cmd);
        a.apply_select(&select);
        b.apply_select(&select);
        assert!(!a.inventoried_b(0));
        assert!(b.inventoried_b(0));
    }

    #[test]
    fn test_select_all_resets_session() {
        let mut t = tag(&[0xAA, 0xBB]);
        t.acknowledge(1, false);
        assert!(t.inventoried_b(1));
        let round = BeginRound {
            sel: 0,
            session: 1,
            target_b: false,
            q: 0,
        };
        assert!(!t.participates(&round));
        t.apply_select(&decode(&codec::select_all(1).unwrap()));
        assert!(t.participates(&round));
    }

    #[test]
    fn test_sl_actions() {
        let mut t = tag(&[0xAA, 0xBB]);
        let sl_all = |action| {
            let mut cmd = decode(&codec::select_all(0).unwrap());
            cmd.target = TARGET_SL;
            cmd.action = action;
            cmd
        };
        t.apply_select(&sl_all(0));
        let sl_round = BeginRound {
            sel: 3,
            session: 0,
            target_b: false,
            q: 0,
        };
        assert!(t.participates(&sl_round));
        t.apply_select(&sl_all(3));
        assert!(!t.participates(&sl_round));
        t.apply_select(&sl_all(3));
        assert!(t.participates(&sl_round));
    }
}
