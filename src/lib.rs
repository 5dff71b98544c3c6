//! # Shardis
//!
//! Cluster-aware asynchronous command dispatch and retry engine for Redis
//! deployments, standalone or sharded.
//!
//! The engine turns "run this command against this key/slot" into a
//! reliable, retried, redirect-following, timeout-bounded network
//! operation. Cluster redirects (MOVED/ASK) and loading states are absorbed
//! transparently; retries are paced and bounded; blocking commands get
//! dedicated watchdog supervision; and cluster-wide administrative
//! operations (delete-by-pattern, counting, flush, key enumeration) are
//! fanned out per slot range and merged with partial-failure reporting.
//!
//! The wire transport is a seam: implementors of
//! [`engine::ConnectionProvider`] and [`engine::NodeConnection`] supply
//! connections; the engine never opens sockets itself.
//!
//! ## Features
//!
//! - `test-utils` - Scriptable in-memory connection layer for tests
//!
//! ## Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # async fn example(provider: Arc<dyn shardis::engine::ConnectionProvider>) -> shardis::Result<()> {
//! use shardis::core::EngineConfig;
//! use shardis::engine::CommandEngine;
//! use shardis::keys::Keys;
//!
//! let engine = CommandEngine::new(provider, EngineConfig::default());
//! let keys = Keys::new(engine.clone());
//!
//! let removed = keys.delete(["user:1", "user:2"]).await?;
//! let total = keys.count().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod engine;
pub mod keys;
pub(crate) mod proto;

#[cfg(test)]
mod stress;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export the high-level types for convenience
pub use crate::core::builder::EngineConfigBuilder;
pub use crate::core::EngineConfig;
pub use crate::engine::{CommandEngine, CommandFuture, Reply};
pub use crate::keys::{FlushMode, Keys};
pub use crate::proto::error::{Error, Result};
pub use crate::proto::frame::Frame;

pub use crate::cluster::key_slot;
