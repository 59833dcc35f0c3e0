//! Workspace-wide limits.
//!
//! Every buffer on the discovery path is a fixed-capacity `heapless`
//! collection sized from these constants.

use static_assertions::const_assert;

/// Maximum number of tags enumerated for one technology per poll cycle.
pub const MAX_DEVICE_LIMIT: usize = 16;

/// Longest tag identifier carried by the registry (ISO18000-3M3 UII, 31 words).
pub const MAX_ID_LEN: usize = 62;

/// Longest Type A UID (triple size).
pub const MAX_UID_A_LEN: usize = 10;

/// Longest frame exchanged with a transceiver, CRC excluded.
pub const MAX_FRAME_LEN: usize = 256;

/// Size of one ISO18000-3M3 inventory result chunk handed out by a transceiver.
pub const MAX_INVENTORY_RESULT_LEN: usize = 512;

/// Extra wake-up attempts mandated by EMVCo before a timeout is escalated.
pub const EMVCO_WAKE_RETRIES: u8 = 2;

/// Longest guard time accepted by configuration validation.
pub const MAX_GUARD_TIME_US: u32 = 1_000_000;

/// Default guard times (NFC Forum Activity).
pub const DEFAULT_GUARD_TIME_A_US: u32 = 5_100;
pub const DEFAULT_GUARD_TIME_B_US: u32 = 5_100;
pub const DEFAULT_GUARD_TIME_V_US: u32 = 5_100;
pub const DEFAULT_GUARD_TIME_I18000P3M3_US: u32 = 10_000;

const_assert!(MAX_ID_LEN >= MAX_UID_A_LEN);
const_assert!(MAX_DEVICE_LIMIT <= u8::MAX as usize);
const_assert!(MAX_FRAME_LEN >= MAX_ID_LEN + 8);
