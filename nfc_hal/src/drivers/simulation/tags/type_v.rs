//! ISO15693 tag model.

use nfc_common::config::ConfigError;
use nfc_discovery::codec::type_v::{self as codec, InventoryMask, UID_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeVState {
    Ready,
    Selected,
    Quiet,
}

#[derive(Debug, Clone)]
pub struct TypeVTag {
    /// UID in transmission order (LSB first).
    uid: [u8; UID_LEN],
    dsfid: u8,
    afi: u8,
    state: TypeVState,
}

impl TypeVTag {
    /// Tag from a UID written MSB first (`E0 04 ...`), the way it is printed.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` unless the UID is 8 bytes.
    pub fn new(uid_msb_first: &[u8], dsfid: u8, afi: u8) -> Result<Self, ConfigError> {
        let mut uid = <[u8; UID_LEN]>::try_from(uid_msb_first).map_err(|_| {
            ConfigError::ValidationError(format!("Type V UID {uid_msb_first:02X?}: length must be 8"))
        })?;
        uid.reverse();
        Ok(Self {
            uid,
            dsfid,
            afi,
            state: TypeVState::Ready,
        })
    }

    pub fn uid(&self) -> &[u8; UID_LEN] {
        &self.uid
    }

    pub fn state(&self) -> TypeVState {
        self.state
    }

    pub(crate) fn power_up(&mut self) {
        self.state = TypeVState::Ready;
    }

    fn response(&self) -> Vec<u8> {
        let mut rsp = Vec::with_capacity(2 + UID_LEN);
        rsp.push(0x00);
        rsp.push(self.dsfid);
        rsp.extend_from_slice(&self.uid);
        rsp
    }

    /// Inventory request. Returns the slot (0 for single-slot rounds) and
    /// the response when the tag takes part.
    pub(crate) fn inventory(&self, afi: Option<u8>, mask: &InventoryMask, one_slot: bool) -> Option<(u8, Vec<u8>)> {
        if self.state == TypeVState::Quiet || !mask.matches(&self.uid) {
            return None;
        }
        if let Some(afi) = afi {
            if afi != 0 && afi != self.afi {
                return None;
            }
        }
        let slot = if one_slot { 0 } else { codec::slot_of(&self.uid, mask.len) };
        Some((slot, self.response()))
    }

    /// Addressed Select: the addressed tag becomes Selected, any other
    /// Selected tag returns to Ready.
    pub(crate) fn select(&mut self, uid: &[u8]) -> Option<Vec<u8>> {
        if uid == self.uid {
            self.state = TypeVState::Selected;
            return Some(vec![0x00]);
        }
        if self.state == TypeVState::Selected {
            self.state = TypeVState::Ready;
        }
        None
    }

    pub(crate) fn stay_quiet(&mut self, uid: &[u8]) {
        if uid == self.uid {
            self.state = TypeVState::Quiet;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID: [u8; 8] = [0xE0, 0x04, 0x01, 0x00, 0x87, 0x65, 0x43, 0x21];

    #[test]
    fn uid_is_stored_lsb_first() {
        let tag = TypeVTag::new(&UID, 0, 0).unwrap();
        assert_eq!(tag.uid()[0], 0x21);
        assert_eq!(tag.uid()[7], 0xE0);
        assert!(TypeVTag::new(&UID[..7], 0, 0).is_err());
    }

    #[test]
    fn slot_follows_mask() {
        let tag = TypeVTag::new(&UID, 0x11, 0).unwrap();
        let (slot, rsp) = tag.inventory(None, &InventoryMask::default(), false).unwrap();
        assert_eq!(slot, 0x1);
        assert_eq!(rsp[1], 0x11);
        assert_eq!(&rsp[2..], tag.uid());

        let mask = InventoryMask { value: 0x1, len: 4 };
        assert_eq!(tag.inventory(None, &mask, false).unwrap().0, 0x2);
        let other = InventoryMask { value: 0x2, len: 4 };
        assert!(tag.inventory(None, &other, false).is_none());
    }

    #[test]
    fn quiet_and_select() {
        let mut tag = TypeVTag::new(&UID, 0, 0x07).unwrap();
        let uid = *tag.uid();
        assert!(tag.inventory(Some(0x08), &InventoryMask::default(), true).is_none());
        assert_eq!(tag.select(&uid), Some(vec![0x00]));
        assert_eq!(tag.state(), TypeVState::Selected);
        assert_eq!(tag.select(&[0; 8]), None);
        assert_eq!(tag.state(), TypeVState::Ready);
        tag.stay_quiet(&uid);
        assert!(tag.inventory(None, &InventoryMask::default(), true).is_none());
        tag.power_up();
        assert!(tag.inventory(Some(0x07), &InventoryMask::default(), true).is_some());
    }
}
