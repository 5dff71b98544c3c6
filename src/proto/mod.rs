//! # Shardis Proto
//!
//! RESP value types and the crate-wide error taxonomy.
//!
//! The byte-level codec belongs to the external transport; the engine works
//! with decoded [`frame::Frame`] values only.
//!
//! ## Modules
//!
//! - [`error`] - Error types for dispatch operations
//! - [`frame`] - Frame types representing RESP data structures

#![warn(missing_docs)]

/// Error types.
pub mod error;
pub mod frame;
