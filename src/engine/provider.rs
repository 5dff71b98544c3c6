//! Trait seams towards the connection layer.
//!
//! The engine never opens sockets. It asks a [`ConnectionProvider`] for a
//! connection suited to a [`NodeSource`] and an intent (read or write),
//! sends invocations through the returned [`NodeConnection`], and hands the
//! connection back exactly once when the attempt resolves. Both seams are
//! object-safe so providers can be swapped (production pool, mock cluster).

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::cluster::SlotRange;
use crate::core::command::{CommandInvocation, CommandSpec};
use crate::engine::shutdown::ShutdownPermit;
use crate::engine::source::NodeSource;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Acquires and releases node connections and answers topology questions.
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Acquires a read-capable connection for the given source.
    fn acquire_read(
        &self,
        source: &NodeSource,
        spec: &CommandSpec,
    ) -> BoxFuture<'static, Result<Arc<dyn NodeConnection>>>;

    /// Acquires a write-capable connection for the given source.
    fn acquire_write(
        &self,
        source: &NodeSource,
        spec: &CommandSpec,
    ) -> BoxFuture<'static, Result<Arc<dyn NodeConnection>>>;

    /// Returns a connection previously acquired for `source`, tagged with
    /// the intent it was acquired under.
    fn release(&self, readonly: bool, source: &NodeSource, conn: Arc<dyn NodeConnection>);

    /// Maps a key to its hash slot.
    fn resolve_slot(&self, key: &[u8]) -> u16;

    /// Returns true when the deployment is a sharded cluster.
    fn is_cluster(&self) -> bool;

    /// The known slot ranges. Standalone deployments expose a single range
    /// covering the whole keyspace.
    fn slot_ranges(&self) -> Vec<SlotRange>;
}

/// A live connection to one node.
pub trait NodeConnection: Send + Sync {
    /// Queues one invocation for transmission.
    fn send(&self, inv: CommandInvocation) -> (WriteHandle, ReplyHandle);

    /// Queues several invocations as one atomic batch.
    ///
    /// Used for ASK priming and for slot-bound multi-key writes. One reply
    /// handle is returned per invocation, in order.
    fn send_batch(&self, invs: Vec<CommandInvocation>) -> (WriteHandle, Vec<ReplyHandle>);

    /// Returns true while the underlying channel is connected and usable.
    fn is_active(&self) -> bool;

    /// Identity of the physical channel. Changes on reconnect; the
    /// blocking-command supervisor compares epochs to detect a lost wait.
    fn epoch(&self) -> u64;

    /// Tears the channel down so it is re-established, abandoning any
    /// server-side state tied to it.
    fn force_reconnect(&self);

    /// Drops command/reply correlation for in-flight commands so a later
    /// reconnect does not match an unrelated reply to a cancelled command.
    fn abandon_pending(&self);

    /// The node's address (host:port).
    fn addr(&self) -> String;
}

/// Resolves when the transport reports the command's bytes on the wire.
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteHandle {
    /// Creates a connected completer/handle pair. The transport keeps the
    /// completer and resolves it when the write finishes.
    pub fn channel() -> (WriteCompleter, WriteHandle) {
        let (tx, rx) = oneshot::channel();
        (WriteCompleter { tx }, WriteHandle { rx })
    }

    /// Awaits the write outcome. A dropped completer counts as a failed
    /// write (the connection went away underneath the command).
    pub async fn outcome(self, spec: &CommandSpec) -> Result<()> {
        match self.rx.await {
            Ok(res) => res,
            Err(_) => Err(Error::Write {
                command: spec.name().to_string(),
                message: "connection closed before write completed".to_string(),
            }),
        }
    }
}

/// Transport-side handle that resolves a [`WriteHandle`].
#[derive(Debug)]
pub struct WriteCompleter {
    tx: oneshot::Sender<Result<()>>,
}

impl WriteCompleter {
    /// Reports the write outcome. Reporting twice is impossible; the handle
    /// side treats a dropped completer as a failed write.
    pub fn complete(self, result: Result<()>) {
        let _ = self.tx.send(result);
    }
}

/// Resolves when the server's reply frame for one invocation arrives.
#[derive(Debug)]
pub struct ReplyHandle {
    rx: oneshot::Receiver<Result<Frame>>,
}

impl ReplyHandle {
    /// Creates a connected completer/handle pair.
    pub fn channel() -> (ReplyCompleter, ReplyHandle) {
        let (tx, rx) = oneshot::channel();
        (ReplyCompleter { tx }, ReplyHandle { rx })
    }

    /// Awaits the reply frame. A dropped completer means the connection
    /// died before the server answered.
    pub async fn reply(self) -> Result<Frame> {
        match self.rx.await {
            Ok(res) => res,
            Err(_) => Err(Error::Connection {
                message: "connection closed before response arrived".to_string(),
            }),
        }
    }
}

/// Transport-side handle that resolves a [`ReplyHandle`].
#[derive(Debug)]
pub struct ReplyCompleter {
    tx: oneshot::Sender<Result<Frame>>,
}

impl ReplyCompleter {
    /// Delivers the reply frame (or a transport error).
    pub fn complete(self, result: Result<Frame>) {
        let _ = self.tx.send(result);
    }
}

/// Holds one acquired connection plus its dispatch permit, releasing both
/// exactly once when the attempt resolves — by any path, including
/// cancellation.
pub(crate) struct ConnGuard {
    provider: Arc<dyn ConnectionProvider>,
    readonly: bool,
    source: NodeSource,
    conn: Option<Arc<dyn NodeConnection>>,
    _permit: ShutdownPermit,
}

impl ConnGuard {
    pub(crate) fn new(
        provider: Arc<dyn ConnectionProvider>,
        readonly: bool,
        source: NodeSource,
        conn: Arc<dyn NodeConnection>,
        permit: ShutdownPermit,
    ) -> Self {
        Self {
            provider,
            readonly,
            source,
            conn: Some(conn),
            _permit: permit,
        }
    }

    pub(crate) fn conn(&self) -> &dyn NodeConnection {
        // Invariant: `conn` is only taken in Drop.
        self.conn
            .as_deref()
            .expect("connection present until guard drops")
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.provider.release(self.readonly, &self.source, conn);
        }
    }
}
