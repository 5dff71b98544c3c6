//! # Shardis Cluster
//!
//! Cluster-side value types: slot hashing, redirect classification, and the
//! slot-range topology view supplied by the connection provider.
//!
//! - **Slot hashing**: CRC16 key-to-slot mapping with hash-tag support
//! - **Redirect classification**: MOVED/ASK/LOADING/CLUSTERDOWN parsing
//! - **Topology view**: read-only [`SlotRange`] ownership data

pub mod errors;
pub mod slot;
pub mod topology;

pub use slot::{key_slot, SLOT_COUNT};
pub use topology::SlotRange;
