//! Batch processor behaviour against a scripted transport.

mod common;

use api_traffic_optimizer::batch::{BatchConfig, BatchProcessor, EnqueueOptions, GroupingStrategy};
use api_traffic_optimizer::{Error, ErrorKind, HttpMethod, TransportError, TransportResponse};
use common::MockTransport;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn processor(transport: &Arc<MockTransport>, config: BatchConfig) -> BatchProcessor {
    BatchProcessor::new(transport.clone(), config)
}

#[tokio::test(start_paused = true)]
async fn test_identical_requests_share_one_call() {
    let transport = Arc::new(MockTransport::echo());
    let batcher = processor(&transport, BatchConfig::new());

    let results = join_all((0..5).map(|_| {
        batcher.enqueue(
            HttpMethod::Get,
            "/api/users/7",
            Some(json!({"fields": "name"})),
            EnqueueOptions::new(),
        )
    }))
    .await;

    assert_eq!(transport.call_count(), 1);
    let first = results[0].as_ref().unwrap().data.clone();
    for r in &results {
        assert_eq!(r.as_ref().unwrap().data, first);
    }
    let stats = batcher.stats();
    assert_eq!(stats.deduplicated_requests, 4);
    assert_eq!(stats.total_requests, 1);
}

fn echo_user() -> MockTransport {
    MockTransport::with_handler(|req| {
        let user = req.headers.get("Authorization").cloned().unwrap_or_default();
        Ok(TransportResponse::ok(json!({ "user": user })))
    })
}

#[tokio::test(start_paused = true)]
async fn test_requests_with_different_headers_are_not_merged() {
    let transport = Arc::new(echo_user());
    let batcher = processor(&transport, BatchConfig::new());

    let (alice, bob, alice_again) = tokio::join!(
        batcher.enqueue(
            HttpMethod::Get,
            "/api/me",
            None,
            EnqueueOptions::new().with_header("Authorization", "alice"),
        ),
        batcher.enqueue(
            HttpMethod::Get,
            "/api/me",
            None,
            EnqueueOptions::new().with_header("Authorization", "bob"),
        ),
        batcher.enqueue(
            HttpMethod::Get,
            "/api/me",
            None,
            EnqueueOptions::new().with_header("authorization", "alice"),
        ),
    );

    assert_eq!(transport.call_count(), 2);
    assert_eq!(alice.unwrap().data, json!({"user": "alice"}));
    assert_eq!(bob.unwrap().data, json!({"user": "bob"}));
    assert_eq!(alice_again.unwrap().data, json!({"user": "alice"}));
    assert_eq!(batcher.stats().deduplicated_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_deduplication_sends_every_request() {
    let transport = Arc::new(MockTransport::echo());
    let batcher = processor(&transport, BatchConfig::new().with_deduplication(false));

    let results = join_all(
        (0..3).map(|_| batcher.enqueue(HttpMethod::Get, "/api/users/7", None, EnqueueOptions::new())),
    )
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(batcher.stats().deduplicated_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_flushes_without_waiting_for_timer() {
    let transport = Arc::new(MockTransport::echo());
    let batcher = processor(
        &transport,
        BatchConfig::new()
            .with_max_batch_size(3)
            .with_max_wait_time(Duration::from_secs(10)),
    );

    let started = tokio::time::Instant::now();
    let results = join_all((1..=3).map(|i| {
        let batcher = &batcher;
        async move {
            batcher
                .enqueue(
                    HttpMethod::Get,
                    &format!("/api/items/{}", i),
                    None,
                    EnqueueOptions::new(),
                )
                .await
        }
    }))
    .await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(batcher.pending_batches().is_empty());

    // An aborted timer must not flush a second, empty batch later.
    tokio::time::sleep(Duration::from_secs(20)).await;
    let stats = batcher.stats();
    assert_eq!(stats.total_batches, 1);
    assert_eq!(stats.total_requests, 3);
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_combinable_content_requests_become_one_call() {
    let transport = Arc::new(MockTransport::echo());
    let batcher = processor(
        &transport,
        BatchConfig::new()
            .with_max_batch_size(20)
            .with_max_wait_time(Duration::from_millis(100))
            .with_combinable_endpoint("/api/content"),
    );

    let results = join_all((1..=10).map(|id| {
        let batcher = batcher.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(2 * id)).await;
            batcher
                .enqueue(
                    HttpMethod::Get,
                    &format!("/api/content?id={}", id),
                    None,
                    EnqueueOptions::new(),
                )
                .await
        }
    }))
    .await;

    assert_eq!(transport.call_count(), 1);
    let call = &transport.calls()[0];
    assert_eq!(call.url, "/api/content");
    assert_eq!(
        call.data.as_ref().unwrap()["id"],
        json!("1,2,3,4,5,6,7,8,9,10")
    );
    for r in &results {
        assert_eq!(r.as_ref().unwrap().data["url"], json!("/api/content"));
    }
    let stats = batcher.stats();
    assert_eq!(stats.combined_calls, 1);
    assert_eq!(stats.network_calls, 1);
    assert_eq!(stats.total_requests, 10);
}

#[tokio::test(start_paused = true)]
async fn test_failed_combined_get_falls_back_to_individual_calls() {
    let transport = Arc::new(MockTransport::with_handler(|req| {
        if req.url.contains('?') {
            Ok(TransportResponse::ok(json!({ "url": req.url })))
        } else {
            Err(TransportError::Status {
                status: 502,
                message: "combined form not supported".into(),
            })
        }
    }));
    let batcher = processor(&transport, BatchConfig::new().with_combinable_endpoint("/api/content"));

    let (a, b) = tokio::join!(
        batcher.enqueue(HttpMethod::Get, "/api/content?a=1", None, EnqueueOptions::new()),
        batcher.enqueue(HttpMethod::Get, "/api/content?b=2", None, EnqueueOptions::new()),
    );

    assert_eq!(a.unwrap().data["url"], json!("/api/content?a=1"));
    assert_eq!(b.unwrap().data["url"], json!("/api/content?b=2"));
    assert_eq!(transport.call_count(), 3);
    let stats = batcher.stats();
    assert_eq!(stats.combined_calls, 0);
    assert_eq!(stats.network_calls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failure_reaches_only_its_own_caller() {
    let transport = Arc::new(MockTransport::with_handler(|req| {
        if req.url.ends_with("/missing") {
            Err(TransportError::Status {
                status: 404,
                message: "not found".into(),
            })
        } else {
            Ok(TransportResponse::ok(json!({"ok": true})))
        }
    }));
    let batcher = processor(&transport, BatchConfig::new());

    let (missing, present) = tokio::join!(
        batcher.enqueue(HttpMethod::Get, "/api/items/missing", None, EnqueueOptions::new()),
        batcher.enqueue(HttpMethod::Get, "/api/items/1", None, EnqueueOptions::new()),
    );

    let err = missing.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::Status { status: 404, .. })
    ));
    assert_eq!(present.unwrap().data, json!({"ok": true}));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_rejects_only_the_slow_caller() {
    let transport = Arc::new(MockTransport::echo().with_latency(Duration::from_millis(500)));
    let batcher = processor(&transport, BatchConfig::new());

    let (impatient, patient) = tokio::join!(
        batcher.enqueue(
            HttpMethod::Get,
            "/api/items/1",
            None,
            EnqueueOptions::new().with_timeout(Duration::from_millis(100)),
        ),
        batcher.enqueue(HttpMethod::Get, "/api/items/2", None, EnqueueOptions::new()),
    );

    let err = impatient.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(matches!(
        err,
        Error::Transport(TransportError::Timeout { timeout_ms: 100 })
    ));
    assert!(patient.is_ok());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_writes_run_in_insertion_order() {
    let transport = Arc::new(MockTransport::echo().with_latency(Duration::from_millis(10)));
    let batcher = processor(&transport, BatchConfig::new());

    let results = join_all((0..3).map(|n| {
        batcher.enqueue(
            HttpMethod::Post,
            "/api/orders",
            Some(json!({ "n": n })),
            EnqueueOptions::new(),
        )
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    let order: Vec<i64> = transport
        .calls()
        .iter()
        .map(|c| c.data.as_ref().unwrap()["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_each_group_keeps_its_own_timer() {
    let transport = Arc::new(MockTransport::echo());
    let batcher = processor(
        &transport,
        BatchConfig::new()
            .with_grouping_strategy(GroupingStrategy::Endpoint)
            .with_max_wait_time(Duration::from_secs(30)),
    );

    let handles: Vec<_> = ["/api/users/1", "/api/users/1?x=2", "/api/feed"]
        .into_iter()
        .map(|url| {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                batcher
                    .enqueue(HttpMethod::Get, url, None, EnqueueOptions::new())
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pending = batcher.pending_batches();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|b| b.timer_armed));
    assert_eq!(batcher.pending_count(), 3);

    assert_eq!(batcher.flush_all().await, 3);
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    assert_eq!(batcher.pending_count(), 0);
    assert_eq!(batcher.stats().total_batches, 2);
}
