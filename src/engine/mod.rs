//! # Shardis Engine
//!
//! The cluster-aware asynchronous command execution engine: node selection,
//! paced retries, redirect following, timeout bounding, blocking-command
//! supervision, and scatter-gather aggregation over slot ranges.
//!
//! ## Modules
//!
//! - [`source`] - Command routing targets
//! - [`provider`] - Trait seams towards the connection layer
//! - [`shutdown`] - Process-wide shutdown coordination
//! - [`dispatch`] - The per-command retry/timeout state machine
//! - [`aggregate`] - Scatter-gather over slot ranges

#![warn(missing_docs)]

use std::sync::Arc;

use bytes::Bytes;

use crate::cluster::SlotRange;
use crate::core::command::{self, CommandInvocation};
use crate::core::EngineConfig;

pub mod aggregate;
pub mod dispatch;
pub mod provider;
pub mod shutdown;
pub mod source;

pub use dispatch::{BatchFuture, CommandFuture, Reply};
pub use provider::{
    ConnectionProvider, NodeConnection, ReplyCompleter, ReplyHandle, WriteCompleter, WriteHandle,
};
pub use shutdown::{ShutdownGate, ShutdownPermit};
pub use source::{NodeSource, Redirect};

use dispatch::Payload;

/// Shared state behind every clone of [`CommandEngine`].
pub(crate) struct EngineShared {
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    pub(crate) config: EngineConfig,
    pub(crate) gate: ShutdownGate,
}

/// The dispatch engine.
///
/// Turns "run this command against this key/slot" into a reliable, retried,
/// redirect-following, timeout-bounded network operation. Cloning is cheap;
/// all clones share the provider, configuration, and shutdown gate.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # async fn example(provider: Arc<dyn shardis::engine::ConnectionProvider>) -> shardis::Result<()> {
/// use shardis::core::command;
/// use shardis::core::EngineConfig;
/// use shardis::engine::CommandEngine;
///
/// let engine = CommandEngine::new(provider, EngineConfig::default());
/// let reply = engine.write(Some("user:1"), command::del("user:1")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CommandEngine {
    shared: Arc<EngineShared>,
}

impl CommandEngine {
    /// Creates an engine over the given connection provider.
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                provider,
                config,
                gate: ShutdownGate::new(),
            }),
        }
    }

    /// The engine's timing configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns true when the deployment is a sharded cluster.
    pub fn is_cluster(&self) -> bool {
        self.shared.provider.is_cluster()
    }

    /// The known slot ranges, as reported by the provider.
    pub fn slot_ranges(&self) -> Vec<SlotRange> {
        self.shared.provider.slot_ranges()
    }

    /// Maps a key to its hash slot via the provider.
    pub fn resolve_slot(&self, key: &str) -> u16 {
        self.shared.provider.resolve_slot(key.as_bytes())
    }

    /// Dispatches one invocation at an explicit source.
    ///
    /// This is the core entry point; the `read`/`write` helpers resolve the
    /// source from a key first.
    pub fn execute(
        &self,
        readonly: bool,
        source: NodeSource,
        inv: CommandInvocation,
    ) -> CommandFuture {
        let rx = dispatch::spawn_dispatch(
            self.shared.clone(),
            readonly,
            source,
            Payload::Single(inv),
        );
        dispatch::command_future(rx)
    }

    /// Dispatches several invocations as one atomic, slot-bound batch.
    ///
    /// Used for multi-key writes that would otherwise cross slot boundaries;
    /// every invocation must target keys owned by the batch's slot.
    pub fn execute_batch(
        &self,
        readonly: bool,
        source: NodeSource,
        invs: Vec<CommandInvocation>,
    ) -> BatchFuture {
        match Payload::batch(invs) {
            Some(payload) => {
                let rx =
                    dispatch::spawn_dispatch(self.shared.clone(), readonly, source, payload);
                dispatch::batch_future(rx)
            }
            None => dispatch::resolved_batch(Vec::new()),
        }
    }

    /// Dispatches a read, routed by the key's slot.
    pub fn read(&self, key: Option<&str>, inv: CommandInvocation) -> CommandFuture {
        self.execute(true, self.source_for_key(key), inv)
    }

    /// Dispatches a write, routed by the key's slot.
    pub fn write(&self, key: Option<&str>, inv: CommandInvocation) -> CommandFuture {
        self.execute(false, self.source_for_key(key), inv)
    }

    /// Dispatches a read bound to an explicit slot.
    pub fn read_slot(&self, slot: u16, inv: CommandInvocation) -> CommandFuture {
        self.execute(true, NodeSource::slot(slot), inv)
    }

    /// Dispatches a write bound to an explicit slot.
    pub fn write_slot(&self, slot: u16, inv: CommandInvocation) -> CommandFuture {
        self.execute(false, NodeSource::slot(slot), inv)
    }

    /// Evaluates a script on the node owning the key's slot, read intent.
    pub fn eval_read(
        &self,
        key: Option<&str>,
        script: &str,
        script_keys: &[&str],
        script_args: &[Bytes],
    ) -> CommandFuture {
        let inv = command::eval(script, script_keys, script_args);
        self.execute(true, self.source_for_key(key), inv)
    }

    /// Evaluates a script on the node owning the key's slot, write intent.
    pub fn eval_write(
        &self,
        key: Option<&str>,
        script: &str,
        script_keys: &[&str],
        script_args: &[Bytes],
    ) -> CommandFuture {
        let inv = command::eval(script, script_keys, script_args);
        self.execute(false, self.source_for_key(key), inv)
    }

    /// Begins shutdown: new dispatches fail with
    /// [`Error::Shutdown`](crate::Error::Shutdown) immediately; in-flight
    /// attempts drain.
    pub fn begin_shutdown(&self) {
        self.shared.gate.begin_shutdown();
    }

    /// Resolves once shutdown began and every in-flight dispatch finished.
    pub async fn drained(&self) {
        self.shared.gate.drained().await
    }

    /// The shutdown gate shared by all clones of this engine.
    pub fn shutdown_gate(&self) -> &ShutdownGate {
        &self.shared.gate
    }

    fn source_for_key(&self, key: Option<&str>) -> NodeSource {
        let slot = key
            .map(|k| self.shared.provider.resolve_slot(k.as_bytes()))
            .unwrap_or(0);
        NodeSource::slot(slot)
    }
}
