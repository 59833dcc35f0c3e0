//! Poll-loop configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [poll]
//! enabled = ["type_a", "type_b", "type_v", "i18000p3m3"]
//! bailout = []
//! mode = "nfc"
//! activity_version = "1.1"
//!
//! [poll.type_a]
//! guard_time_us = 5100
//! device_limit = 4
//!
//! [poll.type_b]
//! device_limit = 2
//! afi = 0
//! ```

use crate::config::ConfigError;
use crate::consts::{
    DEFAULT_GUARD_TIME_A_US, DEFAULT_GUARD_TIME_B_US, DEFAULT_GUARD_TIME_I18000P3M3_US,
    DEFAULT_GUARD_TIME_V_US, MAX_DEVICE_LIMIT, MAX_GUARD_TIME_US,
};
use crate::discovery::types::{ActivityVersion, OperatingMode, PollState, TechMask, Technology};
use serde::{Deserialize, Serialize};
use tracing::warn;

fn default_device_limit() -> u8 {
    1
}

fn default_fsdi() -> u8 {
    8
}

fn default_removal_attempts() -> u8 {
    3
}

fn default_field_reset_us() -> u32 {
    5_100
}

fn default_enabled() -> Vec<Technology> {
    Technology::ALL.to_vec()
}

/// ISO14443-3A / 14443-4A parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeAConfig {
    /// Guard time before WUPA/REQA [us].
    pub guard_time_us: u32,
    /// Tags to enumerate (0 = report collisions without resolving).
    pub device_limit: u8,
    /// Frame size for proximity coupling device integer (RATS).
    pub fsdi: u8,
    /// Card identifier assigned with RATS.
    pub cid: u8,
    /// NFCID3 sent in ATR_REQ.
    pub nfcid3: [u8; 10],
    /// General bytes appended to ATR_REQ.
    pub general_bytes: Vec<u8>,
}

impl Default for TypeAConfig {
    fn default() -> Self {
        Self {
            guard_time_us: DEFAULT_GUARD_TIME_A_US,
            device_limit: default_device_limit(),
            fsdi: default_fsdi(),
            cid: 0,
            nfcid3: [0; 10],
            general_bytes: Vec::new(),
        }
    }
}

/// ISO14443-3B / 14443-4B parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeBConfig {
    pub guard_time_us: u32,
    pub device_limit: u8,
    /// Application family identifier (0 = all families).
    pub afi: u8,
    pub fsdi: u8,
    pub cid: u8,
    /// Divisor receive integer (PICC to PCD bit rate).
    pub dri: u8,
    /// Divisor send integer (PCD to PICC bit rate).
    pub dsi: u8,
}

impl Default for TypeBConfig {
    fn default() -> Self {
        Self {
            guard_time_us: DEFAULT_GUARD_TIME_B_US,
            device_limit: default_device_limit(),
            afi: 0,
            fsdi: default_fsdi(),
            cid: 0,
            dri: 0,
            dsi: 0,
        }
    }
}

/// ISO15693 parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeVConfig {
    pub guard_time_us: u32,
    pub device_limit: u8,
    /// AFI carried in inventory requests (`None` = no AFI flag).
    pub afi: Option<u8>,
}

impl Default for TypeVConfig {
    fn default() -> Self {
        Self {
            guard_time_us: DEFAULT_GUARD_TIME_V_US,
            device_limit: default_device_limit(),
            afi: None,
        }
    }
}

/// ISO18000-3 Mode 3 parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct I18000p3m3Config {
    pub guard_time_us: u32,
    pub device_limit: u8,
    /// Inventory session S0..S3 used by Select and BeginRound.
    pub session: u8,
}

impl Default for I18000p3m3Config {
    fn default() -> Self {
        Self {
            guard_time_us: DEFAULT_GUARD_TIME_I18000P3M3_US,
            device_limit: default_device_limit(),
            session: 0,
        }
    }
}

/// Poll-loop configuration consumed by the discovery engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Technologies to poll (always polled in priority order A, B, V, 18000p3m3).
    #[serde(default = "default_enabled")]
    pub enabled: Vec<Technology>,
    /// Detected technologies that end the poll loop immediately.
    #[serde(default)]
    pub bailout: Vec<Technology>,
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub activity_version: ActivityVersion,
    /// State the next poll starts in.
    #[serde(default)]
    pub next_state: PollState,
    /// Registry index activated when the poll starts in `Activation`.
    #[serde(default)]
    pub activate_index: usize,
    /// Detection attempts made in `Removal` before the tag is reported present.
    #[serde(default = "default_removal_attempts")]
    pub removal_attempts: u8,
    /// Reset the field at the start of every detection phase.
    #[serde(default)]
    pub field_reset_on_start: bool,
    /// Field-off time of a field reset [us].
    #[serde(default = "default_field_reset_us")]
    pub field_reset_us: u32,
    #[serde(default)]
    pub type_a: TypeAConfig,
    #[serde(default)]
    pub type_b: TypeBConfig,
    #[serde(default)]
    pub type_v: TypeVConfig,
    #[serde(default)]
    pub i18000p3m3: I18000p3m3Config,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bailout: Vec::new(),
            mode: OperatingMode::default(),
            activity_version: ActivityVersion::default(),
            next_state: PollState::default(),
            activate_index: 0,
            removal_attempts: default_removal_attempts(),
            field_reset_on_start: false,
            field_reset_us: default_field_reset_us(),
            type_a: TypeAConfig::default(),
            type_b: TypeBConfig::default(),
            type_v: TypeVConfig::default(),
            i18000p3m3: I18000p3m3Config::default(),
        }
    }
}

impl PollConfig {
    /// Enable bitmap.
    pub fn enabled_mask(&self) -> TechMask {
        TechMask::from_technologies(self.enabled.iter().copied())
    }

    /// Bailout bitmap.
    pub fn bailout_mask(&self) -> TechMask {
        TechMask::from_technologies(self.bailout.iter().copied())
    }

    pub fn guard_time_us(&self, tech: Technology) -> u32 {
        match tech {
            Technology::TypeA => self.type_a.guard_time_us,
            Technology::TypeB => self.type_b.guard_time_us,
            Technology::TypeV => self.type_v.guard_time_us,
            Technology::I18000p3m3 => self.i18000p3m3.guard_time_us,
        }
    }

    pub fn device_limit(&self, tech: Technology) -> usize {
        let limit = match tech {
            Technology::TypeA => self.type_a.device_limit,
            Technology::TypeB => self.type_b.device_limit,
            Technology::TypeV => self.type_v.device_limit,
            Technology::I18000p3m3 => self.i18000p3m3.device_limit,
        };
        limit as usize
    }

    /// Set the device limit of one technology.
    pub fn set_device_limit(&mut self, tech: Technology, limit: u8) {
        match tech {
            Technology::TypeA => self.type_a.device_limit = limit,
            Technology::TypeB => self.type_b.device_limit = limit,
            Technology::TypeV => self.type_v.device_limit = limit,
            Technology::I18000p3m3 => self.i18000p3m3.device_limit = limit,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` on the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        let enabled = self.enabled_mask();
        if !enabled.contains(self.bailout_mask()) {
            return invalid("bailout contains technologies that are not enabled".to_string());
        }

        for tech in Technology::ALL {
            if self.device_limit(tech) > MAX_DEVICE_LIMIT {
                return invalid(format!(
                    "{tech}: device_limit {} exceeds {MAX_DEVICE_LIMIT}",
                    self.device_limit(tech)
                ));
            }
            if self.guard_time_us(tech) > MAX_GUARD_TIME_US {
                return invalid(format!(
                    "{tech}: guard_time_us {} exceeds {MAX_GUARD_TIME_US}",
                    self.guard_time_us(tech)
                ));
            }
        }

        if self.type_a.fsdi > 8 || self.type_b.fsdi > 8 {
            return invalid("fsdi must be in 0..=8".to_string());
        }
        if self.type_a.cid > 14 || self.type_b.cid > 14 {
            return invalid("cid must be in 0..=14".to_string());
        }
        if self.type_a.general_bytes.len() > 48 {
            return invalid("type_a.general_bytes longer than 48 bytes".to_string());
        }
        if self.type_b.dri > 3 || self.type_b.dsi > 3 {
            return invalid("type_b.dri/dsi must be in 0..=3".to_string());
        }
        if self.i18000p3m3.session > 3 {
            return invalid("i18000p3m3.session must be in 0..=3".to_string());
        }

        if enabled.is_empty() {
            warn!("No technology enabled, polling will never detect a tag");
        }
        for tech in enabled.technologies() {
            if self.device_limit(tech) == 0 {
                warn!("{tech}: device_limit 0, detection is reported but never resolved");
            }
        }
        Ok(())
    }
}
