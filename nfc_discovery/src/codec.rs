//! Pure frame codecs.
//!
//! Builders and parsers over byte slices, one module per technology. None of
//! these functions perform I/O; the technology pollers in [`crate::tech`]
//! combine them with transceiver exchanges.

pub mod i18000p3m3;
pub mod type_a;
pub mod type_b;
pub mod type_v;
