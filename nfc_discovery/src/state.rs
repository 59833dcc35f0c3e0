//! Poll state machine module root.
//!
//! Detection → CollisionResolution → Activation → Removal across all
//! enabled technologies.

pub mod machine;
