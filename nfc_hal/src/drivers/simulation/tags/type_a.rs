//! ISO14443-3A tag model.
//!
//! ```text
//! Idle ──REQA/WUPA──▶ Ready ──SELECT (last level)──▶ Active ──HLTA──▶ Halt
//!  ▲                    │                                              │
//!  └──other command─────┘◀──────────────────WUPA────────────────────────┘
//! ```
//!
//! A tag woken from Halt falls back to Halt instead of Idle.

use nfc_common::config::ConfigError;
use nfc_common::consts::MAX_UID_A_LEN;
use nfc_discovery::codec::type_a::{self as codec, NFC_DEP_SB, WUPA};

const SAK_CASCADE: u8 = 0x04;
const SAK_ISO_DEP: u8 = 0x20;
const SAK_NFC_DEP: u8 = 0x40;

/// ATS of ISO-DEP tags without a configured one: FSCI 8, 106 kbit/s only, FWI 7.
const DEFAULT_ATS: [u8; 5] = [0x05, 0x78, 0x80, 0x70, 0x02];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeAState {
    Idle,
    Ready,
    Active,
    Halt,
}

#[derive(Debug, Clone)]
pub struct TypeATag {
    uid: heapless::Vec<u8, MAX_UID_A_LEN>,
    fields: heapless::Vec<[u8; 5], 3>,
    atqa: [u8; 2],
    sak: u8,
    ats: Vec<u8>,
    state: TypeAState,
    /// Cascade levels completed by SELECT.
    level: u8,
    from_halt: bool,
}

impl TypeATag {
    /// Tag with a 4, 7 or 10 byte UID.
    ///
    /// `atqa` is the 16-bit ATQA value (sent LSB first); `sak` is the final
    /// SAK. `ats` is used when `sak` advertises ISO-DEP.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` on an unsupported UID length.
    pub fn new(uid: &[u8], atqa: u16, sak: u8, ats: Option<&[u8]>) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::ValidationError(format!("Type A UID {uid:02X?}: length must be 4, 7 or 10"));
        let fields = codec::cascade_fields(uid).map_err(|_| invalid())?;
        let uid = heapless::Vec::from_slice(uid).map_err(|_| invalid())?;
        Ok(Self {
            uid,
            fields,
            atqa: atqa.to_le_bytes(),
            sak: sak & !SAK_CASCADE,
            ats: ats.map_or_else(|| DEFAULT_ATS.to_vec(), <[u8]>::to_vec),
            state: TypeAState::Idle,
            level: 0,
            from_halt: false,
        })
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn state(&self) -> TypeAState {
        self.state
    }

    pub(crate) fn power_up(&mut self) {
        self.state = TypeAState::Idle;
        self.level = 0;
        self.from_halt = false;
    }

    /// Unexpected command: back to Idle, or Halt when woken from there.
    fn fall_back(&mut self) {
        self.state = if self.from_halt {
            TypeAState::Halt
        } else {
            TypeAState::Idle
        };
        self.level = 0;
    }

    /// REQA or WUPA. Returns the ATQA when the tag answers.
    pub(crate) fn wake(&mut self, cmd: u8) -> Option<[u8; 2]> {
        match self.state {
            TypeAState::Idle => self.from_halt = false,
            TypeAState::Halt if cmd == WUPA => self.from_halt = true,
            TypeAState::Ready => {}
            TypeAState::Halt => return None,
            TypeAState::Active => {
                self.fall_back();
                return None;
            }
        }
        self.state = TypeAState::Ready;
        self.level = 0;
        Some(self.atqa)
    }

    /// CLn field addressed by cascade `level`, if this tag takes part in it.
    fn field(&self, level: u8) -> Option<[u8; 5]> {
        if self.state != TypeAState::Ready || self.level + 1 != level {
            return None;
        }
        self.fields.get(usize::from(level) - 1).copied()
    }

    /// Anticollision with `known` bits of the CLn field.
    ///
    /// The reply is aligned: it starts with the byte holding bit `known`,
    /// the bits below `known % 8` cleared.
    pub(crate) fn anticollision(&self, level: u8, prefix: &[u8], known: usize) -> Option<Vec<u8>> {
        let field = self.field(level)?;
        let matches = (0..known).all(|pos| {
            let bit = |bytes: &[u8]| bytes.get(pos / 8).map(|b| (b >> (pos % 8)) & 1);
            bit(prefix) == bit(&field[..])
        });
        if !matches {
            return None;
        }
        let mut reply = field[known / 8..].to_vec();
        if let Some(first) = reply.first_mut() {
            *first &= !((1u8 << (known % 8)) - 1);
        }
        Some(reply)
    }

    /// SELECT of cascade `level`. Returns the SAK when this tag is addressed.
    pub(crate) fn select(&mut self, level: u8, cl: &[u8]) -> Option<u8> {
        if self.state != TypeAState::Ready {
            return None;
        }
        match self.field(level) {
            Some(field) if field.as_slice() == cl => {}
            _ => {
                self.fall_back();
                return None;
            }
        }
        self.level = level;
        if usize::from(level) < self.fields.len() {
            return Some(SAK_CASCADE);
        }
        self.state = TypeAState::Active;
        Some(self.sak)
    }

    pub(crate) fn halt(&mut self) {
        match self.state {
            TypeAState::Active => {
                self.state = TypeAState::Halt;
                self.level = 0;
            }
            TypeAState::Ready => self.fall_back(),
            TypeAState::Idle | TypeAState::Halt => {}
        }
    }

    /// RATS from an ISO-DEP capable, selected tag.
    pub(crate) fn rats(&self) -> Option<Vec<u8>> {
        (self.state == TypeAState::Active && self.sak & SAK_ISO_DEP != 0).then(|| self.ats.clone())
    }

    /// ATR_REQ from an NFC-DEP capable, selected tag.
    ///
    /// `F0 LEN D5 01 NFCID3(10) DID BS BR TO PP`, NFCID3 being the UID
    /// padded with zeros.
    pub(crate) fn atr_req(&self, req: &[u8]) -> Option<Vec<u8>> {
        if self.state != TypeAState::Active || self.sak & SAK_NFC_DEP == 0 {
            return None;
        }
        let did = req.get(14).copied().unwrap_or(0);
        let mut res = vec![NFC_DEP_SB, 18, 0xD5, 0x01];
        let mut nfcid3 = [0u8; 10];
        nfcid3[..self.uid.len()].copy_from_slice(&self.uid);
        res.extend_from_slice(&nfcid3);
        res.extend_from_slice(&[did, 0x00, 0x00, 0x0E, 0x30]);
        Some(res)
    }
}
