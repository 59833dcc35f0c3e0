//! Transceiver trait and RF status types.
//!
//! This module defines:
//! - `Transceiver` trait - Interface every reader front end implements
//! - `RfError` enum - Raw exchange outcomes other than a clean reply
//!
//! The discovery engine only ever talks to a `&mut dyn Transceiver`; any
//! interrupt waiting happens behind this boundary and is invisible above it.

use crate::rf::types::{
    CollisionInfo, InventoryOption, InventoryResult, RfConfig, RxFrame, TxFrame, WaitUnit,
};
use thiserror::Error;

/// Raw outcome of an RF exchange that did not yield a clean reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RfError {
    /// No reply within the configured timeout.
    #[error("No response (timeout)")]
    Timeout,

    /// Two or more tags answered with differing bits.
    #[error("Collision at bit {}", .0.bit_pos)]
    Collision(CollisionInfo),

    /// CRC check failed on the received frame.
    #[error("CRC error")]
    Crc,

    /// Framing, parity or coding error on the received frame.
    #[error("Framing error")]
    Framing,

    /// The exchange was aborted by the host.
    #[error("Aborted")]
    Aborted,

    /// The front end does not implement the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Bus or driver failure.
    #[error("Transceiver I/O error: {0}")]
    Io(String),
}

impl RfError {
    /// CRC, parity and framing errors.
    #[inline]
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Crc | Self::Framing)
    }
}

/// Trait defining the interface for RF front ends.
///
/// # Contract
///
/// - Frames exclude CRC; the front end appends and verifies CRC according
///   to the active [`RfConfig`].
/// - `exchange` blocks until a reply, a timeout or an abort.
/// - A frame that expects no reply (HLTA, ISO18000-3M3 Select) completes
///   with `Err(RfError::Timeout)`.
pub trait Transceiver {
    /// Transmit one frame and wait for the reply.
    fn exchange(&mut self, tx: &TxFrame<'_>) -> Result<RxFrame, RfError>;

    /// Switch the RF field on.
    fn field_on(&mut self) -> Result<(), RfError>;

    /// Switch the RF field off.
    fn field_off(&mut self) -> Result<(), RfError>;

    /// Switch the field off and on again, resetting every tag in it.
    fn field_reset(&mut self) -> Result<(), RfError> {
        self.field_off()?;
        self.field_on()
    }

    /// Block for the given duration.
    fn wait(&mut self, unit: WaitUnit, duration: u32) -> Result<(), RfError>;

    /// Apply protocol, CRC and timeout settings.
    fn set_config(&mut self, config: RfConfig) -> Result<(), RfError>;

    /// Run a hardware-assisted ISO18000-3M3 inventory round.
    ///
    /// `select` is an encoded Select command (`None` keeps the current tag
    /// selection), `begin_round` an encoded BeginRound command; both are
    /// `(bytes, valid_bits_in_last_byte)`.
    fn i18000p3m3_inventory(
        &mut self,
        _select: Option<(&[u8], u8)>,
        _begin_round: (&[u8], u8),
        _option: InventoryOption,
    ) -> Result<InventoryResult, RfError> {
        Err(RfError::Unsupported("ISO18000-3M3 inventory"))
    }

    /// Fetch the next chunk of an inventory result stream.
    fn i18000p3m3_resume_inventory(&mut self) -> Result<InventoryResult, RfError> {
        Err(RfError::Unsupported("ISO18000-3M3 resume inventory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransceiver {
        field: bool,
        resets: u32,
    }

    impl Transceiver for NullTransceiver {
        fn exchange(&mut self, _tx: &TxFrame<'_>) -> Result<RxFrame, RfError> {
            Err(RfError::Timeout)
        }

        fn field_on(&mut self) -> Result<(), RfError> {
            self.field = true;
            self.resets += 1;
            Ok(())
        }

        fn field_off(&mut self) -> Result<(), RfError> {
            self.field = false;
            Ok(())
        }

        fn wait(&mut self, _unit: WaitUnit, _duration: u32) -> Result<(), RfError> {
            Ok(())
        }

        fn set_config(&mut self, _config: RfConfig) -> Result<(), RfError> {
            Ok(())
        }
    }

    #[test]
    fn test_rf_error_display() {
        let err = RfError::Collision(CollisionInfo {
            frame: RxFrame::default(),
            bit_pos: 12,
        });
        assert!(err.to_string().contains("12"));
        assert!(RfError::Io("spi".to_string()).to_string().contains("spi"));
    }

    #[test]
    fn test_integrity_classification() {
        assert!(RfError::Crc.is_integrity());
        assert!(RfError::Framing.is_integrity());
        assert!(!RfError::Timeout.is_integrity());
        assert!(!RfError::Aborted.is_integrity());
    }

    #[test]
    fn test_default_methods() {
        let mut pcd = NullTransceiver {
            field: false,
            resets: 0,
        };
        pcd.field_reset().unwrap();
        assert!(pcd.field);
        assert_eq!(pcd.resets, 1);

        let res = pcd.i18000p3m3_inventory(None, (&[0x80], 1), InventoryOption::Normal);
        assert!(matches!(res, Err(RfError::Unsupported(_))));
        assert!(matches!(
            pcd.i18000p3m3_resume_inventory(),
            Err(RfError::Unsupported(_))
        ));
    }
}
