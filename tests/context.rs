//! End-to-end flows through OptimizerContext.

mod common;

use api_traffic_optimizer::analyzer::RequestRecord;
use api_traffic_optimizer::batch::BatchConfig;
use api_traffic_optimizer::cache::{CacheConfig, MemorySnapshotStore};
use api_traffic_optimizer::telemetry::InMemoryReportSink;
use api_traffic_optimizer::{
    ErrorKind, HttpMethod, OptimizerConfig, OptimizerContext, RequestOptions,
};
use common::MockTransport;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> OptimizerConfig {
    OptimizerConfig::new().with_batch(BatchConfig::new().with_max_wait_time(Duration::from_millis(5)))
}

fn context(transport: &Arc<MockTransport>) -> OptimizerContext {
    OptimizerContext::builder()
        .config(fast_config())
        .transport(transport.clone())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_second_get_is_served_from_cache_and_recorded() {
    let transport = Arc::new(MockTransport::echo());
    let ctx = context(&transport);

    let first = ctx.get("/api/feed", Some(json!({"page": 1}))).await.unwrap();
    let second = ctx.get("/api/feed", Some(json!({"page": 1}))).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.call_count(), 1);
    let metrics = ctx.analyzer().metrics("GET:/api/feed").unwrap();
    assert_eq!(metrics.total_requests, 2);
    assert!((metrics.cache_hit_rate - 0.5).abs() < 1e-9);
    assert_eq!(ctx.cache().stats().hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_skip_cache_always_reaches_the_network() {
    let transport = Arc::new(MockTransport::echo());
    let ctx = context(&transport);

    for _ in 0..2 {
        ctx.request(
            HttpMethod::Get,
            "/api/feed",
            None,
            RequestOptions::new().skip_cache(),
        )
        .await
        .unwrap();
    }
    assert_eq!(transport.call_count(), 2);
    assert!(ctx.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_write_invalidates_cached_reads_of_the_same_path() {
    let transport = Arc::new(MockTransport::echo());
    let ctx = context(&transport);

    ctx.get("/api/items/1", None).await.unwrap();
    ctx.get("/api/items/2", None).await.unwrap();
    assert_eq!(ctx.cache().len(), 2);

    ctx.put("/api/items/1", Some(json!({"name": "renamed"}))).await.unwrap();
    assert_eq!(ctx.cache().len(), 1);

    ctx.get("/api/items/1", None).await.unwrap();
    ctx.get("/api/items/2", None).await.unwrap();
    assert_eq!(transport.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_cached_reads_are_scoped_by_headers() {
    let transport = Arc::new(MockTransport::with_handler(|req| {
        let user = req.headers.get("Authorization").cloned().unwrap_or_default();
        Ok(api_traffic_optimizer::TransportResponse::ok(json!({ "user": user })))
    }));
    let ctx = context(&transport);
    let as_user = |user: &str| RequestOptions::new().with_header("Authorization", user);

    let alice = ctx.request(HttpMethod::Get, "/api/me", None, as_user("alice")).await.unwrap();
    let bob = ctx.request(HttpMethod::Get, "/api/me", None, as_user("bob")).await.unwrap();
    let alice_again = ctx.request(HttpMethod::Get, "/api/me", None, as_user("alice")).await.unwrap();

    assert_eq!(alice, json!({"user": "alice"}));
    assert_eq!(bob, json!({"user": "bob"}));
    assert_eq!(alice_again, alice);
    assert_eq!(transport.call_count(), 2);
    assert_eq!(ctx.cache().len(), 2);
}

#[derive(Debug, Deserialize)]
struct Echoed {
    method: String,
    url: String,
}

#[tokio::test(start_paused = true)]
async fn test_request_as_validates_the_response_shape() {
    let transport = Arc::new(MockTransport::echo());
    let ctx = context(&transport);

    let echoed: Echoed = ctx
        .request_as(HttpMethod::Post, "/api/orders", Some(json!({"sku": "A"})), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(echoed.method, "POST");
    assert_eq!(echoed.url, "/api/orders");

    let err = ctx
        .request_as::<Vec<u32>>(HttpMethod::Get, "/api/orders", None, RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test(start_paused = true)]
async fn test_tuning_is_applied_once_and_is_idempotent() {
    let transport = Arc::new(MockTransport::echo());
    let ctx = context(&transport);
    for _ in 0..120 {
        ctx.analyzer()
            .record(RequestRecord::new(HttpMethod::Get, "/api/search").with_duration_ms(250.0));
    }

    let summary = ctx.tune();
    assert_eq!(summary.batch_overrides, vec!["/api/search".to_string()]);
    assert_eq!(summary.extended_ttls, vec!["GET:/api/search".to_string()]);
    assert_eq!(summary.preload_candidates, 1);

    let base = BatchConfig::default();
    let threshold = ctx.batcher().config().endpoint_overrides["/api/search"];
    assert_eq!(threshold.max_batch_size, Some(base.max_batch_size * 2));
    assert_eq!(threshold.max_wait_time_ms, Some(8));
    let ttl = ctx.cache().endpoint_ttl("GET:/api/search").unwrap();
    assert_eq!(ttl, CacheConfig::default().ttl() * 2);

    assert_eq!(ctx.tune(), summary);
    assert_eq!(ctx.cache().endpoint_ttl("GET:/api/search"), Some(ttl));
    assert_eq!(ctx.cache().preload_candidates()[0].key, "GET:/api/search");
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_restores_reports_and_persists() {
    let transport = Arc::new(MockTransport::echo());
    let store = Arc::new(MemorySnapshotStore::new());
    let sink = Arc::new(InMemoryReportSink::new(10));
    let config = OptimizerConfig::new()
        .with_batch(BatchConfig::new().with_max_wait_time(Duration::from_secs(30)))
        .with_report_interval(Duration::from_millis(50));

    let ctx = Arc::new(
        OptimizerContext::builder()
            .config(config.clone())
            .transport(transport.clone())
            .snapshot_store(store.clone())
            .report_sink(sink.clone())
            .build()
            .unwrap(),
    );
    assert_eq!(ctx.init().await, 0);
    assert!(ctx.is_initialized());
    assert_eq!(ctx.init().await, 0);

    let pending = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.get("/api/profile", None).await })
    };
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(ctx.batcher().pending_count(), 1);
    assert!(!sink.is_empty());

    ctx.shutdown().await;
    assert!(!ctx.is_initialized());
    assert!(pending.await.unwrap().is_ok());
    assert_eq!(ctx.cache().len(), 1);
    assert!(store.blob().is_some());

    let restarted = OptimizerContext::builder()
        .config(config)
        .transport(transport.clone())
        .snapshot_store(store)
        .build()
        .unwrap();
    assert_eq!(restarted.init().await, 1);
    restarted.get("/api/profile", None).await.unwrap();
    assert_eq!(transport.call_count(), 1);
    restarted.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_persists_responses_of_flushes_already_running() {
    let transport = Arc::new(MockTransport::echo().with_latency(Duration::from_millis(200)));
    let store = Arc::new(MemorySnapshotStore::new());
    let config = fast_config();
    let ctx = Arc::new(
        OptimizerContext::builder()
            .config(config.clone())
            .transport(transport.clone())
            .snapshot_store(store.clone())
            .build()
            .unwrap(),
    );
    ctx.init().await;

    let pending = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.get("/api/slow", None).await })
    };
    // The timer has taken the batch; the call is on the wire.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ctx.batcher().pending_count(), 0);
    assert_eq!(transport.call_count(), 1);

    ctx.shutdown().await;
    assert!(pending.await.unwrap().is_ok());

    let restarted = OptimizerContext::builder()
        .config(config)
        .transport(transport.clone())
        .snapshot_store(store)
        .build()
        .unwrap();
    assert_eq!(restarted.init().await, 1);
    restarted.shutdown().await;
}
