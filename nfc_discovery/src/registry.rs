//! Target registry: the bounded list of tags found in one poll cycle.
//!
//! One registry exists per technology. It is reset when the poll state
//! machine enters Detection, appended to only by that technology's resolver,
//! and read by activation and by the host.
//!
//! ## Invariants
//!
//! - `len() <= limit() <= MAX_DEVICE_LIMIT`
//! - identifiers are pairwise distinct

use crate::error::PollError;
use nfc_common::consts::{MAX_DEVICE_LIMIT, MAX_ID_LEN};
use nfc_common::discovery::types::Technology;
use serde::Serialize;

/// Tag identifier: UID (A), PUPI (B), UID (V) or UII (18000p3m3).
pub type TagId = heapless::Vec<u8, MAX_ID_LEN>;

/// Activation payload buffer (ATS, ATR_RES).
pub type ActivationBuf = heapless::Vec<u8, 64>;

/// Technology-specific data captured during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProtocolMeta {
    /// ATQA (as received, LSB first) and final SAK.
    TypeA { atqa: [u8; 2], sak: u8 },
    /// Full ATQB (12 bytes, 13 when extended).
    TypeB { atqb: heapless::Vec<u8, 13> },
    /// Data storage format identifier.
    TypeV { dsfid: u8 },
    /// Protocol control word, extended PC words and, once activated, the handle.
    I18000p3m3 {
        pc: u16,
        xpc: heapless::Vec<u16, 2>,
        handle: Option<u16>,
    },
}

/// Last known state of a tag as seen from the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SleepState {
    /// Answering anticollision / inventory commands.
    Ready = 0,
    /// Selected and possibly activated.
    Active = 1,
    /// Halted (HLTA, HLTB) or quiet (ISO15693 Stay Quiet).
    Halted = 2,
    /// Acknowledged in the current ISO18000-3M3 session.
    Inventoried = 3,
}

/// Result of a completed activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ActivationData {
    /// Type A selected; no higher protocol layer.
    Selected,
    /// ISO14443-4A: answer to select.
    Ats(ActivationBuf),
    /// NFC-DEP: attribute response.
    AtrRes(ActivationBuf),
    /// ISO14443-4B: maximum buffer length index and CID from the ATTRIB answer.
    Attrib { mbli: u8, cid: u8 },
    /// ISO15693: tag in the Selected state.
    SelectedV,
    /// ISO18000-3M3: handle for access commands.
    Handle(u16),
}

/// One tag found in the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedTag {
    pub id: TagId,
    pub meta: ProtocolMeta,
    pub sleep: SleepState,
    pub activation: Option<ActivationData>,
}

impl DetectedTag {
    /// Build a tag entry. Identifiers longer than `MAX_ID_LEN` are rejected.
    pub fn new(id: &[u8], meta: ProtocolMeta, sleep: SleepState) -> Result<Self, PollError> {
        let id = TagId::from_slice(id).map_err(|_| PollError::Internal("identifier too long"))?;
        Ok(Self {
            id,
            meta,
            sleep,
            activation: None,
        })
    }
}

/// Bounded, ordered list of tags for one technology.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    tech: Technology,
    limit: usize,
    tags: heapless::Vec<DetectedTag, MAX_DEVICE_LIMIT>,
}

impl TargetRegistry {
    /// Create an empty registry. `limit` is clamped to `MAX_DEVICE_LIMIT`.
    pub fn new(tech: Technology, limit: usize) -> Self {
        Self {
            tech,
            limit: limit.min(MAX_DEVICE_LIMIT),
            tags: heapless::Vec::new(),
        }
    }

    /// Drop all entries and apply a new device limit.
    pub fn reset(&mut self, limit: usize) {
        self.tags.clear();
        self.limit = limit.min(MAX_DEVICE_LIMIT);
    }

    #[inline]
    pub fn tech(&self) -> Technology {
        self.tech
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// The device limit has been reached.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.tags.len() >= self.limit
    }

    pub fn get(&self, index: usize) -> Option<&DetectedTag> {
        self.tags.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut DetectedTag> {
        self.tags.get_mut(index)
    }

    /// Entry at `index`, or `Internal` when out of range.
    pub(crate) fn entry(&self, index: usize) -> Result<&DetectedTag, PollError> {
        self.tags
            .get(index)
            .ok_or(PollError::Internal("registry index out of range"))
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> Result<&mut DetectedTag, PollError> {
        self.tags
            .get_mut(index)
            .ok_or(PollError::Internal("registry index out of range"))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectedTag> {
        self.tags.iter()
    }

    /// Read-only snapshot of all entries.
    pub fn as_slice(&self) -> &[DetectedTag] {
        &self.tags
    }

    pub fn contains(&self, id: &[u8]) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: &[u8]) -> Option<usize> {
        self.tags.iter().position(|tag| tag.id.as_slice() == id)
    }

    /// Append a tag, returning its index.
    ///
    /// # Errors
    /// `Internal` when the device limit is reached or the identifier is
    /// already registered.
    pub(crate) fn push(&mut self, tag: DetectedTag) -> Result<usize, PollError> {
        if self.is_full() {
            return Err(PollError::Internal("device limit reached"));
        }
        if self.contains(&tag.id) {
            return Err(PollError::Internal("duplicate identifier"));
        }
        self.tags
            .push(tag)
            .map_err(|_| PollError::Internal("registry capacity exceeded"))?;
        Ok(self.tags.len() - 1)
    }

    /// Mark every tag in `from` as `to` (e.g. the previously selected
    /// ISO15693 tag returning to Ready).
    pub(crate) fn transition_all(&mut self, from: SleepState, to: SleepState) {
        for tag in self.tags.iter_mut().filter(|t| t.sleep == from) {
            tag.sleep = to;
        }
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: &[u8]) -> DetectedTag {
        DetectedTag::new(id, ProtocolMeta::TypeV { dsfid: 0 }, SleepState::Ready).unwrap()
    }

    #[test]
    fn test_push_respects_limit() {
        let mut reg = TargetRegistry::new(Technology::TypeV, 2);
        assert_eq!(reg.push(tag(&[1])).unwrap(), 0);
        assert_eq!(reg.push(tag(&[2])).unwrap(), 1);
        assert!(reg.is_full());
        assert_eq!(
            reg.push(tag(&[3])),
            Err(PollError::Internal("device limit reached"))
        );
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let mut reg = TargetRegistry::new(Technology::TypeV, 4);
        reg.push(tag(&[1, 2])).unwrap();
        assert_eq!(
            reg.push(tag(&[1, 2])),
            Err(PollError::Internal("duplicate identifier"))
        );
        assert!(reg.contains(&[1, 2]));
        assert_eq!(reg.position(&[1, 2]), Some(0));
    }

    #[test]
    fn test_limit_clamped_and_reset() {
        let mut reg = TargetRegistry::new(Technology::TypeA, 100);
        assert_eq!(reg.limit(), MAX_DEVICE_LIMIT);
        reg.push(tag(&[9])).unwrap();
        reg.reset(0);
        assert!(reg.is_empty());
        assert!(reg.is_full());
    }

    #[test]
    fn test_identifier_too_long() {
        let long = [0u8; MAX_ID_LEN + 1];
        assert!(DetectedTag::new(&long, ProtocolMeta::TypeV { dsfid: 0 }, SleepState::Ready).is_err());
    }

    #[test]
    fn test_transition_all() {
        let mut reg = TargetRegistry::new(Technology::TypeV, 4);
        reg.push(tag(&[1])).unwrap();
        reg.push(tag(&[2])).unwrap();
        reg.get_mut(1).unwrap().sleep = SleepState::Active;
        reg.transition_all(SleepState::Active, SleepState::Ready);
        assert!(reg.iter().all(|t| t.sleep == SleepState::Ready));
        assert!(reg.entry(5).is_err());
    }
}
