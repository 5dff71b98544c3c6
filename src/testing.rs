//! Scriptable in-memory connection layer.
//!
//! Drives the dispatch engine without sockets: a [`MockProvider`] resolves
//! sources to [`MockNode`]s whose replies are scripted per test. Acquire
//! stalls, acquire failures, write failures, silent servers, and reconnects
//! are all injectable, and every interaction is recorded for assertions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cluster::{key_slot, SlotRange};
use crate::core::command::{CommandInvocation, CommandSpec};
use crate::engine::provider::{
    ConnectionProvider, NodeConnection, ReplyCompleter, ReplyHandle, WriteHandle,
};
use crate::engine::source::NodeSource;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// One scripted reaction of a mock node.
#[derive(Debug)]
pub enum MockReply {
    /// Answer with this frame.
    Frame(Frame),
    /// Never answer. The reply channel is parked so the engine observes a
    /// silent server rather than a dead connection.
    Hold,
}

/// A scriptable node connection.
///
/// Replies are popped from the script in send order; an exhausted script
/// answers `+OK`.
#[derive(Debug)]
pub struct MockNode {
    addr: String,
    script: Mutex<VecDeque<MockReply>>,
    sent: Mutex<Vec<CommandInvocation>>,
    batches: Mutex<Vec<Vec<CommandInvocation>>>,
    parked: Mutex<Vec<ReplyCompleter>>,
    active: AtomicBool,
    epoch: AtomicU64,
    reconnects: AtomicUsize,
    abandons: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MockNode {
    fn new(addr: &str) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.to_string(),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
            epoch: AtomicU64::new(1),
            reconnects: AtomicUsize::new(0),
            abandons: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Scripts a reply frame.
    pub fn push_reply(&self, frame: Frame) {
        self.script.lock().unwrap().push_back(MockReply::Frame(frame));
    }

    /// Scripts an error reply.
    pub fn push_error(&self, msg: &str) {
        self.push_reply(Frame::Error(msg.as_bytes().to_vec()));
    }

    /// Scripts a reply that never arrives.
    pub fn push_hold(&self) {
        self.script.lock().unwrap().push_back(MockReply::Hold);
    }

    /// Every invocation sent over this node, single sends and batch
    /// members alike, in order.
    pub fn sent(&self) -> Vec<CommandInvocation> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of invocations sent over this node.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Every atomic batch sent over this node, in order.
    pub fn batches(&self) -> Vec<Vec<CommandInvocation>> {
        self.batches.lock().unwrap().clone()
    }

    /// Marks the channel healthy or unhealthy.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Simulates a transparent reconnect: the physical channel identity
    /// changes underneath in-flight commands.
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// How often the engine forced a reconnect on this node.
    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// How often the engine dropped command correlation on this node.
    pub fn abandon_count(&self) -> usize {
        self.abandons.load(Ordering::SeqCst)
    }

    /// Makes subsequent writes fail without a reply.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn write_outcome(&self, spec: &CommandSpec) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::Write {
                command: spec.name().to_string(),
                message: "injected write failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn next_reply(&self) -> ReplyHandle {
        let (completer, handle) = ReplyHandle::channel();
        match self.script.lock().unwrap().pop_front() {
            Some(MockReply::Frame(frame)) => completer.complete(Ok(frame)),
            Some(MockReply::Hold) => self.parked.lock().unwrap().push(completer),
            None => completer.complete(Ok(Frame::SimpleString(b"OK".to_vec()))),
        }
        handle
    }
}

impl NodeConnection for MockNode {
    fn send(&self, inv: CommandInvocation) -> (WriteHandle, ReplyHandle) {
        let outcome = self.write_outcome(inv.spec());
        self.sent.lock().unwrap().push(inv);
        let (write_tx, write) = WriteHandle::channel();
        let failed = outcome.is_err();
        write_tx.complete(outcome);
        let reply = if failed {
            // no reply will ever arrive for an unwritten command
            let (completer, handle) = ReplyHandle::channel();
            self.parked.lock().unwrap().push(completer);
            handle
        } else {
            self.next_reply()
        };
        (write, reply)
    }

    fn send_batch(&self, invs: Vec<CommandInvocation>) -> (WriteHandle, Vec<ReplyHandle>) {
        let spec = invs
            .first()
            .map(|inv| *inv.spec())
            .unwrap_or(CommandSpec::new("PING"));
        let outcome = self.write_outcome(&spec);
        self.batches.lock().unwrap().push(invs.clone());
        self.sent.lock().unwrap().extend(invs.iter().cloned());

        let (write_tx, write) = WriteHandle::channel();
        let failed = outcome.is_err();
        write_tx.complete(outcome);

        let replies = invs
            .iter()
            .map(|_| {
                if failed {
                    let (completer, handle) = ReplyHandle::channel();
                    self.parked.lock().unwrap().push(completer);
                    handle
                } else {
                    self.next_reply()
                }
            })
            .collect();
        (write, replies)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn force_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    fn abandon_pending(&self) {
        self.abandons.fetch_add(1, Ordering::SeqCst);
        self.parked.lock().unwrap().clear();
    }

    fn addr(&self) -> String {
        self.addr.clone()
    }
}

/// A scriptable connection provider over a fixed set of mock nodes.
#[derive(Debug)]
pub struct MockProvider {
    cluster: bool,
    nodes: Vec<(SlotRange, Arc<MockNode>)>,
    by_addr: HashMap<String, Arc<MockNode>>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    stalled: Mutex<HashSet<String>>,
    acquire_failures: Mutex<HashMap<String, usize>>,
}

impl MockProvider {
    /// A standalone deployment: one node owning the full keyspace.
    pub fn standalone(addr: &str) -> (Arc<Self>, Arc<MockNode>) {
        let node = MockNode::new(addr);
        let provider = Arc::new(Self::build(false, vec![(SlotRange::full(), node.clone())]));
        (provider, node)
    }

    /// A cluster deployment with one node per slot range.
    pub fn cluster(ranges: &[(u16, u16, &str)]) -> (Arc<Self>, Vec<Arc<MockNode>>) {
        let nodes: Vec<(SlotRange, Arc<MockNode>)> = ranges
            .iter()
            .map(|(start, end, addr)| (SlotRange::new(*start, *end), MockNode::new(addr)))
            .collect();
        let handles = nodes.iter().map(|(_, n)| n.clone()).collect();
        (Arc::new(Self::build(true, nodes)), handles)
    }

    fn build(cluster: bool, nodes: Vec<(SlotRange, Arc<MockNode>)>) -> Self {
        let by_addr = nodes
            .iter()
            .map(|(_, n)| (n.addr.clone(), n.clone()))
            .collect();
        Self {
            cluster,
            nodes,
            by_addr,
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            stalled: Mutex::new(HashSet::new()),
            acquire_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Looks a node up by address.
    pub fn node(&self, addr: &str) -> Option<Arc<MockNode>> {
        self.by_addr.get(addr).cloned()
    }

    /// Makes acquisitions against `addr` hang forever.
    pub fn stall_acquires(&self, addr: &str) {
        self.stalled.lock().unwrap().insert(addr.to_string());
    }

    /// Makes the next `n` acquisitions against `addr` fail.
    pub fn fail_acquires(&self, addr: &str, n: usize) {
        self.acquire_failures
            .lock()
            .unwrap()
            .insert(addr.to_string(), n);
    }

    /// Total connection acquisitions attempted.
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Total connections handed back.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn resolve(&self, source: &NodeSource) -> Option<Arc<MockNode>> {
        if let Some(addr) = source.address() {
            return self.by_addr.get(addr).cloned();
        }
        let slot = source.slot_id()?;
        self.nodes
            .iter()
            .find(|(range, _)| range.contains(slot))
            .map(|(_, node)| node.clone())
    }

    fn acquire(&self, source: &NodeSource) -> BoxFuture<'static, Result<Arc<dyn NodeConnection>>> {
        self.acquires.fetch_add(1, Ordering::SeqCst);

        let Some(node) = self.resolve(source) else {
            return futures::future::ready(Err(Error::Connection {
                message: format!("no node reachable for {}", source),
            }))
            .boxed();
        };

        if self.stalled.lock().unwrap().contains(&node.addr) {
            return futures::future::pending().boxed();
        }

        let mut failures = self.acquire_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&node.addr) {
            if *remaining > 0 {
                *remaining -= 1;
                return futures::future::ready(Err(Error::Connection {
                    message: format!("injected acquire failure for {}", node.addr),
                }))
                .boxed();
            }
        }

        let conn: Arc<dyn NodeConnection> = node;
        futures::future::ready(Ok(conn)).boxed()
    }
}

impl ConnectionProvider for MockProvider {
    fn acquire_read(
        &self,
        source: &NodeSource,
        _spec: &CommandSpec,
    ) -> BoxFuture<'static, Result<Arc<dyn NodeConnection>>> {
        self.acquire(source)
    }

    fn acquire_write(
        &self,
        source: &NodeSource,
        _spec: &CommandSpec,
    ) -> BoxFuture<'static, Result<Arc<dyn NodeConnection>>> {
        self.acquire(source)
    }

    fn release(&self, _readonly: bool, _source: &NodeSource, _conn: Arc<dyn NodeConnection>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn resolve_slot(&self, key: &[u8]) -> u16 {
        key_slot(key)
    }

    fn is_cluster(&self) -> bool {
        self.cluster
    }

    fn slot_ranges(&self) -> Vec<SlotRange> {
        self.nodes.iter().map(|(range, _)| *range).collect()
    }
}
