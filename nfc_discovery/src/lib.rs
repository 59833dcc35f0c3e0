//! # NFC Discovery Engine
//!
//! Polling, anticollision (singulation) and activation for four contactless
//! RF technologies: ISO14443 Type A, ISO14443 Type B, ISO15693 (Type V) and
//! ISO18000-3 Mode 3.
//!
//! ## Architecture
//!
//! 1. **Codecs** ([`codec`]): pure frame builders and parsers over byte
//!    slices (Type A NVB/UID packing, ISO18000-3M3 PC/XPC headers, ...).
//! 2. **Technology pollers** ([`tech`]): per-technology detect, resolve
//!    and activate, driven through the [`tech::TechnologyPoller`] trait.
//! 3. **Resolver driver** ([`resolver`]): the shared "probe, accumulate,
//!    respect the device limit" skeleton stepping a poller's resolver FSM.
//! 4. **Poll state machine** ([`state::machine`]): Detection →
//!    CollisionResolution → Activation → Removal across all technologies.
//!
//! ## Execution Model
//!
//! Single-threaded and strictly sequential: every call is a blocking round
//! trip through a `&mut dyn Transceiver`. The target registries and the
//! collision-pending bitmap are owned by the poll state machine and passed
//! into pollers explicitly; nothing is global. Cancellation is an
//! `RfError::Aborted` from the transceiver, propagated unchanged.

pub mod codec;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod tech;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::error::PollError;
pub use crate::registry::{DetectedTag, ProtocolMeta, SleepState, TargetRegistry};
pub use crate::state::machine::{PollOutcome, PollStateMachine};
