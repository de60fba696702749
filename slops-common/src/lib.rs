//! Wire types shared between `slops-producer` and `slops-consumer`.
//!
//! Everything here is intentionally dependency-light: both sides of the
//! broker link need to agree on it without pulling in the producer's or
//! consumer's own stacks.

pub mod hash;
pub mod marker;

pub use hash::fnv1a_partition;
pub use marker::{MarkerError, MessageSetMarker};

/// Header carrying the producing instance's identity, set on every record.
pub const HEADER_PRODUCER: &str = "Producer";

/// Header carrying a binary-encoded [`MessageSetMarker`], set only on
/// cross-partition hand-off control records.
pub const HEADER_SYNC_EVENT: &str = "SyncEvent";
