//! Key-space administrative operations.
//!
//! Built entirely on the dispatch engine and its scatter-gather layer:
//! cluster-wide delete, delete-by-pattern, counting, flush, random key
//! selection, and lazy key enumeration composed from one cursor scan per
//! slot range.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::cluster::SlotRange;
use crate::core::command::{self, frame_to_int, frame_to_keys};
use crate::engine::aggregate::finish_aggregate;
use crate::engine::{CommandEngine, NodeSource};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Lua script used for delete-by-pattern on standalone deployments, where
/// no cross-slot constraint applies: enumerate matches server-side and
/// delete them in chunks of 5000.
const DELETE_BY_PATTERN_SCRIPT: &str = "local keys = redis.call('keys', ARGV[1]) \
     local n = 0 \
     for i=1, #keys,5000 do \
         n = n + redis.call('del', unpack(keys, i, math.min(i+4999, table.getn(keys)))) \
     end \
     return n;";

/// Which keyspace a [`Keys::flush`] clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// FLUSHDB: the currently selected database on every node.
    Db,
    /// FLUSHALL: every database on every node.
    All,
}

/// Key-space administrative API.
///
/// # Example
///
/// ```no_run
/// # async fn example(engine: shardis::engine::CommandEngine) -> shardis::Result<()> {
/// use shardis::keys::Keys;
///
/// let keys = Keys::new(engine);
/// let removed = keys.delete_by_pattern("session:*").await?;
/// let total = keys.count().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Keys {
    engine: CommandEngine,
}

impl Keys {
    /// Creates the key-space API over a dispatch engine.
    pub fn new(engine: CommandEngine) -> Self {
        Self { engine }
    }

    /// Deletes the given keys, returning how many existed.
    ///
    /// Standalone deployments issue one multi-key DEL. On a cluster the
    /// keys are partitioned by owning slot range and each partition is sent
    /// as an atomic batch of single-key DELs bound to that range's slot,
    /// since multi-key writes crossing slot boundaries are rejected by the
    /// server. Per-key counts are summed across batches; a failure
    /// co-occurring with deleted keys surfaces as
    /// [`Error::PartialFailure`].
    pub async fn delete<I, T>(&self, del_keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let del_keys: Vec<String> = del_keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .collect();
        if del_keys.is_empty() {
            return Ok(0);
        }

        if !self.engine.is_cluster() {
            let reply = self
                .engine
                .write(None, command::del_many(del_keys))
                .await?;
            return Ok(frame_to_int(reply.frame)?.max(0) as u64);
        }

        let ranges = self.engine.slot_ranges();
        let mut by_range: HashMap<SlotRange, Vec<String>> = HashMap::new();
        for key in del_keys {
            let slot = self.engine.resolve_slot(&key);
            if let Some(range) = ranges.iter().find(|r| r.contains(slot)) {
                by_range.entry(*range).or_default().push(key);
            }
        }

        let pending: FuturesUnordered<_> = by_range
            .into_iter()
            .map(|(range, range_keys)| {
                let invs: Vec<_> = range_keys.into_iter().map(|k| command::del(k)).collect();
                let batch =
                    self.engine
                        .execute_batch(false, NodeSource::slot(range.start), invs);
                async move {
                    let frames = batch.await?;
                    let mut removed = 0u64;
                    for frame in frames {
                        removed += frame_to_int(frame)?.max(0) as u64;
                    }
                    Ok::<u64, Error>(removed)
                }
            })
            .collect();

        fold_counts(pending).await
    }

    /// Deletes every key matching `pattern`, returning how many were
    /// removed.
    ///
    /// Standalone deployments run one server-side script; clusters
    /// enumerate matches per slot range and delete them through slot-bound
    /// batches.
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        if !self.engine.is_cluster() {
            let reply = self
                .engine
                .eval_write(
                    None,
                    DELETE_BY_PATTERN_SCRIPT,
                    &[],
                    &[Bytes::from(pattern.to_string())],
                )
                .await?;
            return Ok(frame_to_int(reply.frame)?.max(0) as u64);
        }

        let engine = self.engine.clone();
        let pending: FuturesUnordered<_> = engine
            .slot_ranges()
            .into_iter()
            .map(|range| {
                let engine = engine.clone();
                let pattern = pattern.to_string();
                async move {
                    let found = engine
                        .execute(
                            true,
                            NodeSource::slot(range.start),
                            command::keys(pattern),
                        )
                        .await?;
                    let found = frame_to_keys(found.frame)?;
                    if found.is_empty() {
                        return Ok::<u64, Error>(0);
                    }

                    let invs: Vec<_> = found.into_iter().map(|k| command::del(k)).collect();
                    let frames = engine
                        .execute_batch(false, NodeSource::slot(range.start), invs)
                        .await?;
                    let mut removed = 0u64;
                    for frame in frames {
                        removed += frame_to_int(frame)?.max(0) as u64;
                    }
                    Ok(removed)
                }
            })
            .collect();

        fold_counts(pending).await
    }

    /// Collects every key matching `pattern` across all slot ranges.
    pub async fn find_keys_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        self.engine
            .read_all(command::keys(pattern.to_string()), Vec::new(), |mut acc, frame| {
                acc.extend(frame_to_keys(frame).unwrap_or_default());
                acc
            })
            .await
    }

    /// Counts keys across all slot ranges.
    ///
    /// Resolves to the sum of per-range DBSIZE results. If a range fails
    /// while others succeed, the error carries the partial sum.
    pub async fn count(&self) -> Result<u64> {
        let pending: FuturesUnordered<_> = self
            .engine
            .slot_ranges()
            .into_iter()
            .map(|range| {
                let fut =
                    self.engine
                        .execute(true, NodeSource::slot(range.start), command::dbsize());
                async move {
                    let reply = fut.await?;
                    Ok::<u64, Error>(frame_to_int(reply.frame)?.max(0) as u64)
                }
            })
            .collect();

        fold_counts(pending).await
    }

    /// Flushes the keyspace on every node.
    pub async fn flush(&self, mode: FlushMode) -> Result<()> {
        let inv = match mode {
            FlushMode::Db => command::flushdb(),
            FlushMode::All => command::flushall(),
        };
        self.engine.write_all(inv, (), |(), _| ()).await
    }

    /// Picks a random key from a random non-empty slot range, or None when
    /// the keyspace is empty.
    pub async fn random_key(&self) -> Result<Option<String>> {
        let reply = self.engine.read_random(command::random_key()).await?;
        Ok(reply
            .frame
            .to_bulk_string()
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Starts a lazy key enumeration, optionally filtered by pattern.
    ///
    /// The scan is finite and restartable: call again for a fresh pass. It
    /// is backed by one cursor-based SCAN per slot range, composed into one
    /// logical sequence.
    pub fn scan_keys(&self, pattern: Option<&str>) -> KeyScan {
        KeyScan {
            engine: self.engine.clone(),
            pattern: pattern.map(str::to_string),
            ranges: self.engine.slot_ranges(),
            range_idx: 0,
            cursor: 0,
            buffer: VecDeque::new(),
        }
    }
}

/// Sums per-range counts, recording the first failure; resolves via the
/// aggregate partial-failure rule with the partial sum as the success
/// measure.
async fn fold_counts(
    mut pending: FuturesUnordered<impl std::future::Future<Output = Result<u64>>>,
) -> Result<u64> {
    let mut total = 0u64;
    let mut first_error: Option<Error> = None;
    while let Some(res) = pending.next().await {
        match res {
            Ok(n) => total += n,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    finish_aggregate(total, total, first_error)
}

/// A lazy key enumeration over the whole deployment.
///
/// Drives one SCAN cursor at a time, moving to the next slot range when a
/// cursor completes. Keys arrive in server order within a range; ranges are
/// visited in topology order.
pub struct KeyScan {
    engine: CommandEngine,
    pattern: Option<String>,
    ranges: Vec<SlotRange>,
    range_idx: usize,
    cursor: u64,
    buffer: VecDeque<String>,
}

impl KeyScan {
    /// Returns the next key, or None once every range's cursor completed.
    pub async fn next(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(key) = self.buffer.pop_front() {
                return Ok(Some(key));
            }
            let Some(range) = self.ranges.get(self.range_idx) else {
                return Ok(None);
            };

            let inv = command::scan(self.cursor, self.pattern.as_deref());
            // Scans run against masters so a migrating replica can't feed
            // the cursor stale pages.
            let reply = self.engine.write_slot(range.start, inv).await?;
            let (next_cursor, page) = parse_scan_reply(reply.frame)?;
            self.buffer.extend(page);

            if next_cursor == 0 {
                self.range_idx += 1;
                self.cursor = 0;
            } else {
                self.cursor = next_cursor;
            }
        }
    }
}

/// Parses a SCAN reply: `[cursor, [key, ...]]`.
fn parse_scan_reply(frame: Frame) -> Result<(u64, Vec<String>)> {
    let mut items = match frame {
        Frame::Array(items) if items.len() == 2 => items,
        other => {
            return Err(Error::Protocol {
                message: format!("malformed SCAN reply: {:?}", other),
            })
        }
    };

    let malformed = || Error::Protocol {
        message: "malformed SCAN reply".to_string(),
    };
    let page = frame_to_keys(items.pop().ok_or_else(malformed)?)?;
    let cursor_frame = items.pop().ok_or_else(malformed)?;

    let cursor = match cursor_frame {
        Frame::Integer(n) if n >= 0 => n as u64,
        Frame::BulkString(Some(data)) => std::str::from_utf8(&data)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::Protocol {
                message: "malformed SCAN cursor".to_string(),
            })?,
        other => {
            return Err(Error::Protocol {
                message: format!("malformed SCAN cursor: {:?}", other),
            })
        }
    };

    Ok((cursor, page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::key_slot;
    use crate::core::EngineConfig;
    use crate::testing::{MockNode, MockProvider};
    use bytes::Bytes;
    use std::sync::Arc;

    fn keys_over(provider: Arc<MockProvider>) -> Keys {
        Keys::new(CommandEngine::new(provider, EngineConfig::default()))
    }

    fn scripted_keys_reply(names: &[&str]) -> Frame {
        Frame::Array(
            names
                .iter()
                .map(|n| Frame::BulkString(Some(Bytes::from(n.to_string()))))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_delete_standalone_single_multikey_command() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        // DEL "a" "b" where only "a" exists
        node.push_reply(Frame::Integer(1));

        let keys = keys_over(provider);
        let removed = keys.delete(["a", "b"]).await.unwrap();

        assert_eq!(removed, 1);
        let sent = node.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].spec().name(), "DEL");
        assert_eq!(sent[0].args().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_empty_is_a_noop() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        let keys = keys_over(provider);
        let removed = keys.delete(Vec::<String>::new()).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(node.sent_count(), 0);
    }

    /// Splits the slot space so the lowest-hashing key lands in the first
    /// range and every other key in the second, making partition assertions
    /// independent of concrete CRC16 values.
    fn split_ranges_for(del_keys: &[&str]) -> (u16, [usize; 2]) {
        let mut slots: Vec<u16> = del_keys.iter().map(|k| key_slot(k.as_bytes())).collect();
        slots.sort_unstable();
        let split = slots[0];
        let low = slots.iter().filter(|s| **s <= split).count();
        (split, [low, del_keys.len() - low])
    }

    #[tokio::test]
    async fn test_delete_cluster_partitions_by_owning_range() {
        let del_keys = ["alpha", "beta", "gamma", "delta"];
        let (split, expected) = split_ranges_for(&del_keys);
        let (provider, nodes) = MockProvider::cluster(&[
            (0, split, "127.0.0.1:7000"),
            (split + 1, 16383, "127.0.0.1:7001"),
        ]);

        for (node, want) in nodes.iter().zip(expected) {
            for _ in 0..want {
                node.push_reply(Frame::Integer(1));
            }
        }

        let keys = keys_over(provider);
        let removed = keys.delete(del_keys).await.unwrap();
        assert_eq!(removed, del_keys.len() as u64);

        // Each owning range saw exactly one atomic batch of single-key DELs.
        for (node, want) in nodes.iter().zip(expected) {
            if want == 0 {
                assert!(node.batches().is_empty());
                continue;
            }
            let batches = node.batches();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), want);
            assert!(batches[0]
                .iter()
                .all(|inv| inv.spec().name() == "DEL" && inv.args().len() == 1));
        }
    }

    #[tokio::test]
    async fn test_delete_cluster_partial_failure_carries_deleted_count() {
        let del_keys = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
        let (split, per_range) = split_ranges_for(&del_keys);
        assert!(per_range[0] > 0 && per_range[1] > 0, "keys must span ranges");
        let (provider, nodes) = MockProvider::cluster(&[
            (0, split, "127.0.0.1:7000"),
            (split + 1, 16383, "127.0.0.1:7001"),
        ]);

        // The low range succeeds; the high range errors on its first DEL.
        for _ in 0..per_range[0] {
            nodes[0].push_reply(Frame::Integer(1));
        }
        nodes[1].push_error("ERR write refused");

        let keys = keys_over(provider);
        let err = keys.delete(del_keys).await.unwrap_err();

        match err {
            Error::PartialFailure { succeeded, cause } => {
                assert_eq!(succeeded, per_range[0] as u64);
                assert!(matches!(*cause, Error::Server { .. }));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_by_pattern_standalone_uses_script() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        node.push_reply(Frame::Integer(5));

        let keys = keys_over(provider);
        let removed = keys.delete_by_pattern("user:*").await.unwrap();
        assert_eq!(removed, 5);

        let sent = node.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].spec().name(), "EVAL");
        // script, numkeys, pattern argument
        assert_eq!(sent[0].args().len(), 3);
        assert_eq!(sent[0].args()[2], Bytes::from("user:*"));
    }

    #[tokio::test]
    async fn test_delete_by_pattern_cluster_queries_every_range() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        // Range A: three matches, then three per-key deletes.
        nodes[0].push_reply(scripted_keys_reply(&["user:1", "user:2", "user:3"]));
        for _ in 0..3 {
            nodes[0].push_reply(Frame::Integer(1));
        }
        // Range B: no matches; no delete batch follows.
        nodes[1].push_reply(scripted_keys_reply(&[]));

        let keys = keys_over(provider.clone());
        let removed = keys.delete_by_pattern("user:*").await.unwrap();

        assert_eq!(removed, 3);
        assert!(nodes[0].sent_count() >= 1);
        assert!(nodes[1].sent_count() >= 1);
        assert_eq!(nodes[0].batches().len(), 1);
        assert!(nodes[1].batches().is_empty());
        // KEYS on both ranges plus one delete batch: zero retries.
        assert_eq!(provider.acquires(), 3);
        assert_eq!(provider.releases(), 3);
    }

    #[tokio::test]
    async fn test_count_sums_ranges() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        nodes[0].push_reply(Frame::Integer(5));
        nodes[1].push_reply(Frame::Integer(7));

        let keys = keys_over(provider);
        assert_eq!(keys.count().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_count_partial_failure_carries_partial_sum() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        nodes[0].push_reply(Frame::Integer(5));
        nodes[1].push_error("ERR unavailable");

        let keys = keys_over(provider);
        let err = keys.count().await.unwrap_err();

        match err {
            Error::PartialFailure { succeeded, .. } => assert_eq!(succeeded, 5),
            other => panic!("expected PartialFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flush_reaches_every_range() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);

        let keys = keys_over(provider);
        keys.flush(FlushMode::Db).await.unwrap();
        keys.flush(FlushMode::All).await.unwrap();

        for node in &nodes {
            let sent = node.sent();
            assert_eq!(sent.len(), 2);
            assert_eq!(sent[0].spec().name(), "FLUSHDB");
            assert_eq!(sent[1].spec().name(), "FLUSHALL");
        }
    }

    #[tokio::test]
    async fn test_random_key_decodes_bulk() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        node.push_reply(Frame::BulkString(Some(Bytes::from("some:key"))));

        let keys = keys_over(provider);
        assert_eq!(keys.random_key().await.unwrap().as_deref(), Some("some:key"));
    }

    #[tokio::test]
    async fn test_random_key_empty_keyspace() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        node.push_reply(Frame::Null);

        let keys = keys_over(provider);
        assert_eq!(keys.random_key().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_keys_by_pattern_unions_ranges() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        nodes[0].push_reply(scripted_keys_reply(&["a", "b"]));
        nodes[1].push_reply(scripted_keys_reply(&["c"]));

        let keys = keys_over(provider);
        let mut found = keys.find_keys_by_pattern("*").await.unwrap();
        found.sort();
        assert_eq!(found, vec!["a", "b", "c"]);
    }

    fn scan_page(cursor: u64, names: &[&str]) -> Frame {
        Frame::Array(vec![
            Frame::BulkString(Some(Bytes::from(cursor.to_string()))),
            scripted_keys_reply(names),
        ])
    }

    fn script_scan(node: &Arc<MockNode>, pages: &[(u64, &[&str])]) {
        for (cursor, names) in pages {
            node.push_reply(scan_page(*cursor, names));
        }
    }

    #[tokio::test]
    async fn test_scan_keys_composes_one_cursor_per_range() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        script_scan(&nodes[0], &[(5, &["k1", "k2"]), (0, &["k3"])]);
        script_scan(&nodes[1], &[(0, &["k4"])]);

        let keys = keys_over(provider);
        let mut scan = keys.scan_keys(None);

        let mut collected = Vec::new();
        while let Some(key) = scan.next().await.unwrap() {
            collected.push(key);
        }
        assert_eq!(collected, vec!["k1", "k2", "k3", "k4"]);
        assert!(scan.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_keys_restartable() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        script_scan(&node, &[(0, &["a"])]);
        script_scan(&node, &[(0, &["a"])]);

        let keys = keys_over(provider);

        let mut first = keys.scan_keys(Some("a*"));
        assert_eq!(first.next().await.unwrap().as_deref(), Some("a"));
        assert!(first.next().await.unwrap().is_none());

        // A fresh scan re-issues from cursor zero.
        let mut second = keys.scan_keys(Some("a*"));
        assert_eq!(second.next().await.unwrap().as_deref(), Some("a"));
        assert!(second.next().await.unwrap().is_none());
    }

    #[test]
    fn test_parse_scan_reply() {
        let frame = Frame::Array(vec![
            Frame::BulkString(Some(Bytes::from("17"))),
            Frame::Array(vec![
                Frame::BulkString(Some(Bytes::from("a"))),
                Frame::BulkString(Some(Bytes::from("b"))),
            ]),
        ]);
        let (cursor, page) = parse_scan_reply(frame).unwrap();
        assert_eq!(cursor, 17);
        assert_eq!(page, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_scan_reply_integer_cursor() {
        let frame = Frame::Array(vec![Frame::Integer(0), Frame::Array(vec![])]);
        let (cursor, page) = parse_scan_reply(frame).unwrap();
        assert_eq!(cursor, 0);
        assert!(page.is_empty());
    }

    #[test]
    fn test_parse_scan_reply_malformed() {
        assert!(parse_scan_reply(Frame::Null).is_err());
        assert!(parse_scan_reply(Frame::Array(vec![Frame::Integer(0)])).is_err());

        let bad_cursor = Frame::Array(vec![
            Frame::BulkString(Some(Bytes::from("abc"))),
            Frame::Array(vec![]),
        ]);
        assert!(parse_scan_reply(bad_cursor).is_err());
    }
}
