//! 调度系统集成测试

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fries_rpc::{
    handler_fn, ActHandler, Headers, MatchOrder, RpcConfig, RpcCore, RpcError,
};
use serde_json::{json, Value};

/// 求和处理器
fn sum_handler() -> Arc<dyn ActHandler> {
    handler_fn(|message, _headers| {
        let a = message["a"].as_i64().unwrap_or(0);
        let b = message["b"].as_i64().unwrap_or(0);
        Ok(json!(a + b))
    })
}

/// 异步睡眠处理器
struct SleepHandler {
    delay_ms: u64,
}

#[async_trait::async_trait]
impl ActHandler for SleepHandler {
    async fn handle(&self, _message: Value, _headers: &mut Headers) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(json!("done"))
    }
}

#[tokio::test]
async fn test_sum_dispatch() {
    let core = RpcCore::with_defaults();
    core.add(json!({"role": "math", "cmd": "sum"}), sum_handler())
        .unwrap();

    let result = core
        .act(json!({"role": "math", "cmd": "sum", "a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(result, json!(5));
}

#[tokio::test]
async fn test_empty_index_pattern_not_found() {
    let core = RpcCore::with_defaults();
    let err = core.act(json!({"role": "x"})).await.unwrap_err();
    assert!(matches!(err, RpcError::PatternNotFound(_)));
    // 错误信息包含序列化后的模式
    assert!(err.to_string().contains("role:x"));
}

#[tokio::test]
async fn test_default_timeout_raises_pattern_timeout() {
    let core = RpcCore::new(RpcConfig::builder().timeout_ms(100).build());
    core.add("role:a", Arc::new(SleepHandler { delay_ms: 400 }))
        .unwrap();

    let started = Instant::now();
    let err = core.act("role:a").await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        RpcError::PatternTimeout { timeout_ms: 100, .. }
    ));
    // 调用方在 T + ε 内被释放
    assert!(elapsed >= Duration::from_millis(90));
    assert!(elapsed < Duration::from_millis(350));
}

#[tokio::test]
async fn test_zero_caller_timeout_falls_back_to_instance_default() {
    let core = RpcCore::new(RpcConfig::builder().timeout_ms(100).build());
    core.add("role:a", Arc::new(SleepHandler { delay_ms: 400 }))
        .unwrap();

    // $timeout:0 是假值, 回退实例默认值, 调用方无法单方面关闭超时
    let started = Instant::now();
    let err = core.act("role:a,$timeout:0").await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        RpcError::PatternTimeout { timeout_ms: 100, .. }
    ));
    assert!(elapsed < Duration::from_millis(350));
}

#[tokio::test]
async fn test_timeout_does_not_cancel_handler() {
    let core = RpcCore::new(RpcConfig::builder().timeout_ms(50).build());
    let completed = Arc::new(AtomicUsize::new(0));
    let completed_clone = completed.clone();

    struct TrackingHandler {
        delay_ms: u64,
        completed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ActHandler for TrackingHandler {
        async fn handle(&self, _m: Value, _h: &mut Headers) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(json!("late"))
        }
    }

    core.add(
        "role:a",
        Arc::new(TrackingHandler {
            delay_ms: 200,
            completed: completed_clone,
        }),
    )
    .unwrap();

    let err = core.act("role:a").await.unwrap_err();
    assert!(matches!(err, RpcError::PatternTimeout { .. }));
    assert_eq!(completed.load(Ordering::SeqCst), 0);

    // 超时只释放调用方, 处理器继续执行到完成
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_depth_order_dispatches_deeper() {
    let core = RpcCore::new(RpcConfig::builder().match_order(MatchOrder::Depth).build());
    core.add("r:x", handler_fn(|_, _| Ok(json!("h1")))).unwrap();
    core.add("r:x,k:1", handler_fn(|_, _| Ok(json!("h2"))))
        .unwrap();

    let result = core.act("r:x,k:1").await.unwrap();
    assert_eq!(result, json!("h2"));
}

#[tokio::test]
async fn test_insertion_order_dispatches_earliest() {
    let core = RpcCore::new(
        RpcConfig::builder()
            .match_order(MatchOrder::Insertion)
            .build(),
    );
    core.add("r:x", handler_fn(|_, _| Ok(json!("h1")))).unwrap();
    core.add("r:x", handler_fn(|_, _| Ok(json!("h2")))).unwrap();

    let result = core.act("r:x").await.unwrap();
    assert_eq!(result, json!("h1"));
}

#[tokio::test]
async fn test_nowait_resolves_immediately_error_not_raised() {
    let core = RpcCore::with_defaults();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();

    struct FailingSlowHandler {
        ran: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ActHandler for FailingSlowHandler {
        async fn handle(&self, _m: Value, _h: &mut Headers) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.ran.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("后台处理失败")
        }
    }

    core.add("role:bg", Arc::new(FailingSlowHandler { ran: ran_clone }))
        .unwrap();

    let started = Instant::now();
    let result = core.act("role:bg,$nowait:true").await.unwrap();
    // 立即返回空结果
    assert_eq!(result, Value::Null);
    assert!(started.elapsed() < Duration::from_millis(100));

    // 处理器照常执行, 错误被记录而不是抛出
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_break_short_circuits_chain() {
    let core = RpcCore::with_defaults();
    let second_ran = Arc::new(AtomicUsize::new(0));
    let second_ran_clone = second_ran.clone();

    core.add_chain(
        "r:e",
        vec![
            handler_fn(|_, headers| {
                headers.break_chain = true;
                Ok(json!("stop"))
            }),
            handler_fn(move |_, _| {
                second_ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok(json!("ignored"))
            }),
        ],
    )
    .unwrap();

    let result = core.act("r:e").await.unwrap();
    assert_eq!(result, json!("stop"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second_ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_act_with_merges_overrides() {
    let core = RpcCore::with_defaults();
    core.add(json!({"role": "math", "cmd": "sum"}), sum_handler())
        .unwrap();

    let result = core
        .act_with("role:math,cmd:sum", json!({"a": 4, "b": 6}))
        .await
        .unwrap();
    assert_eq!(result, json!(10));
}

#[tokio::test]
async fn test_local_flag_still_finds_local_handler() {
    let core = RpcCore::with_defaults();
    core.add("role:a", handler_fn(|_, _| Ok(json!("local"))))
        .unwrap();

    let result = core.act("role:a,$local:true").await.unwrap();
    assert_eq!(result, json!("local"));
}

#[tokio::test]
async fn test_invalid_meta_rejected_after_lookup() {
    let core = RpcCore::with_defaults();
    core.add("role:a", handler_fn(|_, _| Ok(Value::Null)))
        .unwrap();

    let err = core.act("role:a,$timeout:soon").await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidHeaders(_)));
}

#[tokio::test]
async fn test_remove_then_act_not_found() {
    let core = RpcCore::with_defaults();
    core.add("role:a", handler_fn(|_, _| Ok(Value::Null)))
        .unwrap();
    core.remove("role:a").unwrap();

    let err = core.act("role:a").await.unwrap_err();
    assert!(matches!(err, RpcError::PatternNotFound(_)));
}

#[tokio::test]
async fn test_notify_local_publishes_routing_key_topic() {
    let core = RpcCore::with_defaults();
    core.add(json!({"role": "math", "cmd": "sum"}), sum_handler())
        .unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    core.subscribe(
        "a.2.b.3.cmd.sum.role.math",
        Arc::new(move |event| {
            assert_eq!(event.message["a"], json!(2));
            received_clone.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await;

    let result = core
        .act(json!({"role": "math", "cmd": "sum", "a": 2, "b": 3, "$notify": true}))
        .await
        .unwrap();
    assert_eq!(result, json!(5));

    // 扇出是脱钩的, 轮询等待投递完成
    let mut delivered = false;
    for _ in 0..50 {
        if received.load(Ordering::SeqCst) == 1 {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered, "本地发射器未收到事件");
}

#[tokio::test]
async fn test_fanout_completes_after_caller_result() {
    let core = RpcCore::with_defaults();
    core.add("role:a", handler_fn(|_, _| Ok(json!("ok"))))
        .unwrap();

    let fanout_done_at = Arc::new(AtomicU64::new(0));
    let fanout_done_clone = fanout_done_at.clone();
    let epoch = Instant::now();

    core.subscribe(
        "*",
        Arc::new(move |_event| {
            std::thread::sleep(Duration::from_millis(100));
            fanout_done_clone.store(epoch.elapsed().as_millis() as u64, Ordering::SeqCst);
        }),
    )
    .await;

    let result = core.act("role:a,$notify:true").await.unwrap();
    let result_at = epoch.elapsed().as_millis() as u64;
    assert_eq!(result, json!("ok"));

    // 调用方结果可见时扇出尚未完成
    assert_eq!(fanout_done_at.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let done_at = fanout_done_at.load(Ordering::SeqCst);
    assert!(done_at > 0, "扇出未完成");
    assert!(result_at <= done_at);
}

#[tokio::test]
async fn test_handler_failure_surfaces_with_pattern() {
    let core = RpcCore::with_defaults();
    core.add("role:fail", handler_fn(|_, _| anyhow::bail!("磁盘已满")))
        .unwrap();

    let err = core.act("role:fail").await.unwrap_err();
    match err {
        RpcError::HandlerFailure { pattern, source } => {
            assert!(pattern.contains("role:fail"));
            assert!(source.to_string().contains("磁盘已满"));
        }
        other => panic!("期望 HandlerFailure, 得到 {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_acts_are_independent() {
    let core = Arc::new(RpcCore::new(RpcConfig::builder().timeout_ms(2000).build()));
    core.add(json!({"role": "math", "cmd": "sum"}), sum_handler())
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..20i64 {
        let core = core.clone();
        handles.push(tokio::spawn(async move {
            core.act(json!({"role": "math", "cmd": "sum", "a": i, "b": i}))
                .await
                .unwrap()
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result, json!(2 * i as i64));
    }
}

#[tokio::test]
async fn test_stats_after_mixed_outcomes() {
    let core = RpcCore::with_defaults();
    core.add("role:ok", handler_fn(|_, _| Ok(Value::Null)))
        .unwrap();
    core.add("role:bad", handler_fn(|_, _| anyhow::bail!("失败")))
        .unwrap();

    core.act("role:ok").await.unwrap();
    core.act("role:ok").await.unwrap();
    let _ = core.act("role:bad").await;

    let stats = core.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 1);
    assert!(stats.success_rate > 0.6 && stats.success_rate < 0.7);
}
