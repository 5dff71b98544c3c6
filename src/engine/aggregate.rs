//! Scatter-gather aggregation over slot ranges.
//!
//! All-slots operations dispatch once per known range in parallel and fold
//! completions through a caller-supplied combine step; random reads probe
//! shuffled ranges sequentially until one answers non-null. Standalone
//! providers expose a single range, so everything here collapses to one
//! dispatch without special-casing.

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;

use crate::core::command::{self, CommandInvocation};
use crate::engine::dispatch::Reply;
use crate::engine::source::NodeSource;
use crate::engine::CommandEngine;
use crate::proto::frame::Frame;
use crate::{Error, Result};

impl CommandEngine {
    /// Dispatches `inv` to every slot range with read intent and folds the
    /// replies into `init` via `combine`.
    ///
    /// Resolution follows the aggregate partial-failure rule: the folded
    /// accumulator when every range succeeded, the recorded failure when
    /// none did, and a partial-failure error when both coexist.
    pub async fn read_all<A, F>(&self, inv: CommandInvocation, init: A, combine: F) -> Result<A>
    where
        F: FnMut(A, Frame) -> A,
    {
        self.all_slots(true, inv, init, combine).await
    }

    /// Dispatches `inv` to every slot range with write intent and folds the
    /// replies into `init` via `combine`.
    pub async fn write_all<A, F>(&self, inv: CommandInvocation, init: A, combine: F) -> Result<A>
    where
        F: FnMut(A, Frame) -> A,
    {
        self.all_slots(false, inv, init, combine).await
    }

    /// Evaluates a script on every slot range with write intent, folding
    /// replies via `combine`.
    pub async fn eval_write_all<A, F>(
        &self,
        script: &str,
        script_keys: &[&str],
        script_args: &[Bytes],
        init: A,
        combine: F,
    ) -> Result<A>
    where
        F: FnMut(A, Frame) -> A,
    {
        let inv = command::eval(script, script_keys, script_args);
        self.all_slots(false, inv, init, combine).await
    }

    /// Probes shuffled slot ranges one at a time and resolves with the
    /// first non-null reply, or null once every range answered null.
    ///
    /// Sequential on purpose: the semantics are "any one non-empty answer",
    /// not "all answers". The first error encountered is terminal.
    pub async fn read_random(&self, inv: CommandInvocation) -> Result<Reply> {
        let mut ranges = self.slot_ranges();
        ranges.shuffle(&mut rand::thread_rng());

        for range in ranges {
            let reply = self
                .execute(true, NodeSource::slot(range.start), inv.clone())
                .await?;
            if !reply.frame.is_null() {
                return Ok(reply);
            }
        }
        Ok(Reply::null())
    }

    async fn all_slots<A, F>(
        &self,
        readonly: bool,
        inv: CommandInvocation,
        init: A,
        mut combine: F,
    ) -> Result<A>
    where
        F: FnMut(A, Frame) -> A,
    {
        let ranges = self.slot_ranges();
        let mut pending: FuturesUnordered<_> = ranges
            .iter()
            .map(|range| self.execute(readonly, NodeSource::slot(range.start), inv.clone()))
            .collect();

        let mut acc = init;
        let mut succeeded: u64 = 0;
        let mut first_error: Option<Error> = None;

        // Every fanned-out sub-operation reports before the aggregate
        // resolves, success or failure.
        while let Some(res) = pending.next().await {
            match res {
                Ok(reply) => {
                    acc = combine(acc, reply.frame);
                    succeeded += 1;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        finish_aggregate(acc, succeeded, first_error)
    }
}

/// Resolves an aggregate: the accumulator when everything succeeded, the
/// recorded failure when nothing did, or a partial-failure error when a
/// success coexists with a failure.
///
/// Whether a completion racing a failure lands in the success tally is
/// timing-dependent; the same fan-out may resolve as a lone failure or as a
/// partial failure depending on completion order. That nondeterminism is
/// deliberate and covered by tests.
pub(crate) fn finish_aggregate<A>(
    acc: A,
    succeeded: u64,
    first_error: Option<Error>,
) -> Result<A> {
    match first_error {
        None => Ok(acc),
        Some(cause) if succeeded > 0 => Err(Error::PartialFailure {
            succeeded,
            cause: Box::new(cause),
        }),
        Some(cause) => Err(cause),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineConfig;
    use crate::testing::MockProvider;

    fn engine_over(provider: std::sync::Arc<MockProvider>) -> CommandEngine {
        CommandEngine::new(provider, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_read_all_folds_every_range() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 5460, "127.0.0.1:7000"),
            (5461, 10922, "127.0.0.1:7001"),
            (10923, 16383, "127.0.0.1:7002"),
        ]);
        nodes[0].push_reply(Frame::Integer(5));
        nodes[1].push_reply(Frame::Integer(7));
        nodes[2].push_reply(Frame::Integer(1));

        let engine = engine_over(provider.clone());
        let total = engine
            .read_all(command::dbsize(), 0i64, |acc, frame| {
                acc + frame.to_int().unwrap_or(0)
            })
            .await
            .unwrap();

        assert_eq!(total, 13);
        for node in &nodes {
            assert_eq!(node.sent_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_write_all_partial_failure() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        nodes[0].push_reply(Frame::SimpleString(b"OK".to_vec()));
        nodes[1].push_error("ERR flush refused");

        let engine = engine_over(provider);
        let err = engine
            .write_all(command::flushdb(), (), |(), _| ())
            .await
            .unwrap_err();

        match err {
            Error::PartialFailure { succeeded, cause } => {
                assert_eq!(succeeded, 1);
                assert!(matches!(*cause, Error::Server { .. }));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_all_pure_failure_surfaces_first_error() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        nodes[0].push_error("ERR nope");
        nodes[1].push_error("ERR nope");

        let engine = engine_over(provider);
        let err = engine
            .write_all(command::flushdb(), (), |(), _| ())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server { .. }));
    }

    #[tokio::test]
    async fn test_read_all_standalone_collapses_to_single_dispatch() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        node.push_reply(Frame::Integer(9));

        let engine = engine_over(provider.clone());
        let total = engine
            .read_all(command::dbsize(), 0i64, |acc, frame| {
                acc + frame.to_int().unwrap_or(0)
            })
            .await
            .unwrap();

        assert_eq!(total, 9);
        assert_eq!(provider.acquires(), 1);
    }

    #[tokio::test]
    async fn test_read_random_returns_first_non_null() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 5460, "127.0.0.1:7000"),
            (5461, 10922, "127.0.0.1:7001"),
            (10923, 16383, "127.0.0.1:7002"),
        ]);
        nodes[0].push_reply(Frame::Null);
        nodes[1].push_reply(Frame::Null);
        nodes[2].push_reply(Frame::BulkString(Some("winner".into())));

        let engine = engine_over(provider);
        let reply = engine.read_random(command::random_key()).await.unwrap();

        // Probe order is shuffled, but null answers keep the probe moving,
        // so the one non-null value always wins.
        assert_eq!(reply.frame, Frame::BulkString(Some("winner".into())));
    }

    #[tokio::test]
    async fn test_read_random_exhausts_to_null() {
        let (provider, nodes) = MockProvider::cluster(&[
            (0, 8191, "127.0.0.1:7000"),
            (8192, 16383, "127.0.0.1:7001"),
        ]);
        nodes[0].push_reply(Frame::Null);
        nodes[1].push_reply(Frame::Null);

        let engine = engine_over(provider.clone());
        let reply = engine.read_random(command::random_key()).await.unwrap();

        assert!(reply.frame.is_null());
        // Sequential probing touched every range.
        assert_eq!(provider.acquires(), 2);
    }

    #[tokio::test]
    async fn test_read_random_error_is_terminal() {
        let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
        node.push_error("ERR boom");

        let engine = engine_over(provider);
        let err = engine.read_random(command::random_key()).await.unwrap_err();
        assert!(matches!(err, Error::Server { .. }));
    }

    #[test]
    fn test_finish_aggregate_all_success() {
        let result = finish_aggregate(42u64, 3, None);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_finish_aggregate_pure_failure() {
        let result: Result<u64> = finish_aggregate(
            0,
            0,
            Some(Error::Server {
                message: "ERR boom".to_string(),
            }),
        );
        assert!(matches!(result, Err(Error::Server { .. })));
    }

    #[test]
    fn test_finish_aggregate_partial_failure() {
        let result: Result<u64> = finish_aggregate(
            12,
            12,
            Some(Error::Server {
                message: "ERR boom".to_string(),
            }),
        );
        match result {
            Err(Error::PartialFailure { succeeded, cause }) => {
                assert_eq!(succeeded, 12);
                assert!(matches!(*cause, Error::Server { .. }));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
    }
}
