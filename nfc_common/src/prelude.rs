//! Prelude module for common re-exports.
//!
//! ```rust
//! use nfc_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::discovery::config::{
    I18000p3m3Config, PollConfig, TypeAConfig, TypeBConfig, TypeVConfig,
};

// ─── Discovery vocabulary ───────────────────────────────────────────
pub use crate::discovery::types::{ActivityVersion, OperatingMode, PollState, TechMask, Technology};

// ─── RF contract ────────────────────────────────────────────────────
pub use crate::rf::transceiver::{RfError, Transceiver};
pub use crate::rf::types::{
    CollisionInfo, FrameBuf, InventoryOption, InventoryResult, Protocol, RfConfig, RxFrame,
    TxFrame, WaitUnit,
};

// ─── Limits ─────────────────────────────────────────────────────────
pub use crate::consts::{MAX_DEVICE_LIMIT, MAX_ID_LEN};
