//! Technology and poll-state enums.
//!
//! All enums use `#[repr(u8)]`; technology sets are carried as the
//! [`TechMask`] bitmap (enable, detected, bailout and collision-pending).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Contactless RF technology handled by the discovery engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Technology {
    /// ISO14443-3A.
    TypeA = 0,
    /// ISO14443-3B.
    TypeB = 1,
    /// ISO15693 (NFC-V).
    TypeV = 2,
    /// ISO18000-3 Mode 3.
    I18000p3m3 = 3,
}

impl Technology {
    /// All technologies in poll priority order.
    pub const ALL: [Technology; 4] = [
        Technology::TypeA,
        Technology::TypeB,
        Technology::TypeV,
        Technology::I18000p3m3,
    ];

    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::TypeA),
            1 => Some(Self::TypeB),
            2 => Some(Self::TypeV),
            3 => Some(Self::I18000p3m3),
            _ => None,
        }
    }

    /// Single-bit mask for this technology.
    #[inline]
    pub const fn mask(self) -> TechMask {
        TechMask::from_bits_truncate(1 << self as u8)
    }

    /// Short display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::TypeA => "TypeA",
            Self::TypeB => "TypeB",
            Self::TypeV => "TypeV",
            Self::I18000p3m3 => "I18000p3m3",
        }
    }
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// One bit per technology.
    ///
    /// Used for the enable bitmap, the technology-detected bitmap, the
    /// bailout bitmap and the collision-pending bitmap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TechMask: u8 {
        const TYPE_A      = 0x01;
        const TYPE_B      = 0x02;
        const TYPE_V      = 0x04;
        const I18000P3M3  = 0x08;
    }
}

impl TechMask {
    /// Build a mask from a list of technologies.
    pub fn from_technologies<I: IntoIterator<Item = Technology>>(techs: I) -> Self {
        techs
            .into_iter()
            .fold(Self::empty(), |mask, tech| mask | tech.mask())
    }

    /// Technologies in this mask, in poll priority order.
    pub fn technologies(self) -> impl Iterator<Item = Technology> {
        Technology::ALL
            .into_iter()
            .filter(move |tech| self.contains(tech.mask()))
    }

    /// Highest-priority technology in this mask.
    pub fn first(self) -> Option<Technology> {
        self.technologies().next()
    }

    #[inline]
    pub fn has(self, tech: Technology) -> bool {
        self.contains(tech.mask())
    }

    /// Set or clear the bit for `tech`.
    #[inline]
    pub fn assign(&mut self, tech: Technology, value: bool) {
        self.set(tech.mask(), value);
    }
}

/// Regulatory/operating mode of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum OperatingMode {
    /// NFC Forum Activity.
    #[default]
    Nfc = 0,
    /// EMVCo contactless: wake-up commands and local retries.
    Emvco = 1,
    /// Plain ISO behaviour.
    Iso = 2,
}

/// NFC Forum Activity specification version.
///
/// 1.0 keeps a lone Type A tag READY when Type A is in the bailout bitmap;
/// 1.1 halts detected tags and halts earlier Type B tags during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActivityVersion {
    #[serde(rename = "1.0")]
    V1_0 = 0,
    #[default]
    #[serde(rename = "1.1")]
    V1_1 = 1,
}

/// Poll state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PollState {
    /// Probe every enabled technology once.
    #[default]
    Detection = 0,
    /// Enumerate tags of a detected technology.
    CollisionResolution = 1,
    /// Activate one resolved tag.
    Activation = 2,
    /// Wait for the activated tag to leave the field.
    Removal = 3,
}

impl PollState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Detection),
            1 => Some(Self::CollisionResolution),
            2 => Some(Self::Activation),
            3 => Some(Self::Removal),
            _ => None,
        }
    }
}
