//! ISO14443-3B tag model.
//!
//! A tag receiving REQB/WUPB with N slots picks slot `PUPI[0] mod N`.
//! Slot 1 answers at once; any other slot waits for its slot marker.

use nfc_common::config::ConfigError;
use nfc_discovery::codec::type_b::ATQB_TAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeBState {
    Idle,
    /// Waiting for the marker of the 0-based slot.
    ReadyRequested(u8),
    ReadyDeclared,
    Active,
    Halt,
}

#[derive(Debug, Clone)]
pub struct TypeBTag {
    pupi: [u8; 4],
    app_data: [u8; 4],
    protocol_info: [u8; 3],
    afi: u8,
    state: TypeBState,
}

impl TypeBTag {
    /// # Errors
    /// `ConfigError::ValidationError` unless the PUPI is 4 bytes.
    pub fn new(pupi: &[u8], app_data: [u8; 4], protocol_info: [u8; 3], afi: u8) -> Result<Self, ConfigError> {
        let pupi = <[u8; 4]>::try_from(pupi)
            .map_err(|_| ConfigError::ValidationError(format!("PUPI {pupi:02X?}: length must be 4")))?;
        Ok(Self {
            pupi,
            app_data,
            protocol_info,
            afi,
            state: TypeBState::Idle,
        })
    }

    pub fn pupi(&self) -> &[u8; 4] {
        &self.pupi
    }

    pub fn state(&self) -> TypeBState {
        self.state
    }

    pub(crate) fn power_up(&mut self) {
        self.state = TypeBState::Idle;
    }

    /// `50 PUPI(4) AppData(4) ProtocolInfo(3)`.
    pub(crate) fn atqb(&self) -> Vec<u8> {
        let mut atqb = Vec::with_capacity(12);
        atqb.push(ATQB_TAG);
        atqb.extend_from_slice(&self.pupi);
        atqb.extend_from_slice(&self.app_data);
        atqb.extend_from_slice(&self.protocol_info);
        atqb
    }

    /// AFI 0 addresses every family; otherwise the family nibble must match,
    /// and a zero sub-family nibble matches any sub-family.
    fn afi_matches(&self, afi: u8) -> bool {
        if afi == 0 {
            return true;
        }
        let family = afi & 0xF0 == self.afi & 0xF0;
        let sub = afi & 0x0F == 0 || afi & 0x0F == self.afi & 0x0F;
        family && sub
    }

    /// REQB / WUPB with `slots` slots. Returns the ATQB when the tag chose slot 1.
    pub(crate) fn request(&mut self, afi: u8, slots: u8, wakeup: bool) -> Option<Vec<u8>> {
        let eligible = match self.state {
            TypeBState::Idle | TypeBState::ReadyRequested(_) | TypeBState::ReadyDeclared => true,
            TypeBState::Halt => wakeup,
            TypeBState::Active => false,
        };
        if !eligible || !self.afi_matches(afi) {
            return None;
        }
        let slot = self.pupi[0] % slots.max(1);
        if slot == 0 {
            self.state = TypeBState::ReadyDeclared;
            return Some(self.atqb());
        }
        self.state = TypeBState::ReadyRequested(slot);
        None
    }

    /// Slot marker for the 0-based `slot`.
    pub(crate) fn slot_marker(&mut self, slot: u8) -> Option<Vec<u8>> {
        if self.state != TypeBState::ReadyRequested(slot) {
            return None;
        }
        self.state = TypeBState::ReadyDeclared;
        Some(self.atqb())
    }

    /// HLTB. Returns the `00` answer when addressed.
    ///
    /// A tag still waiting for its slot marker accepts it as well.
    pub(crate) fn halt(&mut self, pupi: &[u8]) -> Option<Vec<u8>> {
        let listening = !matches!(self.state, TypeBState::Idle | TypeBState::Halt);
        if !listening || pupi != self.pupi {
            return None;
        }
        self.state = TypeBState::Halt;
        Some(vec![0x00])
    }

    /// ATTRIB. Returns `MBLI|CID` (MBLI 0) when addressed.
    pub(crate) fn attrib(&mut self, pupi: &[u8], cid: u8) -> Option<Vec<u8>> {
        if self.state != TypeBState::ReadyDeclared || pupi != self.pupi {
            return None;
        }
        self.state = TypeBState::Active;
        Some(vec![cid & 0x0F])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(pupi0: u8) -> TypeBTag {
        TypeBTag::new(&[pupi0, 0x22, 0x33, 0x44], [0; 4], [0x00, 0x81, 0x71], 0).unwrap()
    }

    #[test]
    fn slot_choice_and_markers() {
        let mut t = tag(0x06);
        assert_eq!(t.request(0, 4, false), None);
        assert_eq!(t.state(), TypeBState::ReadyRequested(2));
        assert_eq!(t.slot_marker(1), None);
        let atqb = t.slot_marker(2).unwrap();
        assert_eq!(atqb.len(), 12);
        assert_eq!(&atqb[1..5], t.pupi());
        assert_eq!(t.state(), TypeBState::ReadyDeclared);
    }

    #[test]
    fn halted_tag_needs_wupb() {
        let mut t = tag(0x04);
        assert!(t.request(0, 1, false).is_some());
        assert_eq!(t.halt(&[0x04, 0x22, 0x33, 0x44]), Some(vec![0x00]));
        assert_eq!(t.request(0, 1, false), None);
        assert!(t.request(0, 1, true).is_some());
        assert_eq!(t.attrib(&[0x04, 0x22, 0x33, 0x44], 3), Some(vec![0x03]));
        assert_eq!(t.state(), TypeBState::Active);
        assert_eq!(t.request(0, 1, true), None);
    }

    #[test]
    fn afi_filtering() {
        let mut t = TypeBTag::new(&[1, 2, 3, 4], [0; 4], [0, 0x81, 0x71], 0x12).unwrap();
        assert!(t.afi_matches(0x00));
        assert!(t.afi_matches(0x10));
        assert!(t.afi_matches(0x12));
        assert!(!t.afi_matches(0x13));
        assert!(!t.afi_matches(0x20));
        assert_eq!(t.request(0x30, 1, true), None);
        assert!(t.request(0x10, 1, true).is_some());
    }

    #[test]
    fn pupi_length_checked() {
        assert!(TypeBTag::new(&[1, 2, 3], [0; 4], [0; 3], 0).is_err());
    }
}
