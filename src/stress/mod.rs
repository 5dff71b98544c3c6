//! Internal stress tests for the dispatch engine.
//!
//! These tests verify dispatch behavior under high concurrency: every
//! in-flight command resolves exactly once and every acquired connection is
//! handed back.

use crate::core::command;
use crate::core::EngineConfig;
use crate::engine::CommandEngine;
use crate::proto::frame::Frame;
use crate::testing::MockProvider;

#[tokio::test]
async fn test_dispatch_stress() {
    let (provider, node) = MockProvider::standalone("127.0.0.1:6379");
    for _ in 0..1000 {
        node.push_reply(Frame::Integer(1));
    }

    let engine = CommandEngine::new(provider.clone(), EngineConfig::default());

    let mut handles = Vec::new();
    for i in 0..1000 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("key{}", i);
            let reply = engine.write(Some(&key), command::del(key.clone())).await;
            assert_eq!(reply.unwrap().frame, Frame::Integer(1));
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(provider.acquires(), 1000);
    assert_eq!(provider.releases(), 1000);
    assert_eq!(engine.shutdown_gate().in_flight(), 0);
}

#[tokio::test]
async fn test_dispatch_stress_cluster_fanout() {
    let (provider, nodes) = MockProvider::cluster(&[
        (0, 5460, "127.0.0.1:7000"),
        (5461, 10922, "127.0.0.1:7001"),
        (10923, 16383, "127.0.0.1:7002"),
    ]);
    for node in &nodes {
        for _ in 0..100 {
            node.push_reply(Frame::Integer(3));
        }
    }

    let engine = CommandEngine::new(provider.clone(), EngineConfig::default());

    let mut handles = Vec::new();
    for _ in 0..100 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let total = engine
                .read_all(command::dbsize(), 0u64, |acc, frame| {
                    acc + frame.to_int().unwrap_or(0) as u64
                })
                .await
                .unwrap();
            assert_eq!(total, 9);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(provider.acquires(), 300);
    assert_eq!(provider.releases(), 300);
}
