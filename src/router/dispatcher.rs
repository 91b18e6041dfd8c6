//! 调度器
//!
//! 单次调用的端到端执行：组合请求模式、索引查找、传输器选择、
//! 执行信封（超时竞速、慢调用告警、即发即忘、错误分类）。
//!
//! 执行信封是一个状态机：Pending → Running → (Succeeded |
//! Failed | TimedOut)。超时只释放调用方，已在执行的处理器跑完
//! 为止，其结果被丢弃；需要真正取消的处理器自带协作式取消。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinError;
use tracing::{debug, error, warn};

use super::event_bus::EventBus;
use super::fanout;
use super::headers::Headers;
use crate::core::config::{Classifier, ErrorDisposition, RpcConfig};
use crate::pattern::{beautify, split, IntoPattern, Pattern, PatternIndex};
use crate::transport::{Transport, TransportRegistry};
use crate::utils::{Result, RpcError};

// ============================================================================
// 处理器
// ============================================================================

/// 本地处理器 trait
///
/// 处理器通过独占引用读写头部；设置 `break` 字段可以短路链式
/// 调用。错误用 `anyhow::Error` 表达，经分类器处置后透传。
#[async_trait]
pub trait ActHandler: Send + Sync {
    /// 处理一次调用
    async fn handle(&self, message: Value, headers: &mut Headers) -> anyhow::Result<Value>;
}

/// 处理器链
///
/// 一个注册条目的一到多个执行步骤，顺序执行，头部独占传递。
pub type HandlerChain = Vec<Arc<dyn ActHandler>>;

/// 同步闭包适配的处理器
struct FnHandler<F>(F);

#[async_trait]
impl<F> ActHandler for FnHandler<F>
where
    F: Fn(Value, &mut Headers) -> anyhow::Result<Value> + Send + Sync,
{
    async fn handle(&self, message: Value, headers: &mut Headers) -> anyhow::Result<Value> {
        (self.0)(message, headers)
    }
}

/// 把同步闭包包装成处理器
///
/// # Example
///
/// ```
/// use fries_rpc::router::dispatcher::handler_fn;
/// use serde_json::json;
///
/// let handler = handler_fn(|message, _headers| {
///     Ok(json!(message["a"].as_i64().unwrap_or(0) + message["b"].as_i64().unwrap_or(0)))
/// });
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn ActHandler>
where
    F: Fn(Value, &mut Headers) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// 注册载荷
///
/// 本地链或具名传输器。
#[derive(Clone)]
pub enum HandlerRef {
    /// 进程内处理器链
    Local(HandlerChain),
    /// 具名传输器（实际调用来自其 `send`）
    Transport(String),
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerRef::Local(chain) => write!(f, "Local({} 步)", chain.len()),
            HandlerRef::Transport(name) => write!(f, "Transport({})", name),
        }
    }
}

/// 执行目标（载荷解析之后）
enum Target {
    Chain(HandlerChain),
    Remote(Arc<dyn Transport>),
}

// ============================================================================
// 调度统计
// ============================================================================

/// 调度统计信息
#[derive(Debug, Default)]
pub struct DispatchStats {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    total_latency_us: AtomicU64,
}

impl DispatchStats {
    /// 记录一次调用结果
    pub fn record(&self, success: bool, latency_us: u64, timed_out: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 获取统计快照
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);

        DispatchStatsSnapshot {
            total,
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            success_rate: if total > 0 {
                succeeded as f64 / total as f64
            } else {
                0.0
            },
            avg_latency_us: if total > 0 { total_latency / total } else { 0 },
        }
    }

    /// 重置统计
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
    }
}

/// 调度统计快照
#[derive(Debug, Clone)]
pub struct DispatchStatsSnapshot {
    /// 总调用数
    pub total: u64,
    /// 成功调用数
    pub succeeded: u64,
    /// 失败调用数
    pub failed: u64,
    /// 超时调用数
    pub timed_out: u64,
    /// 成功率
    pub success_rate: f64,
    /// 平均延迟（微秒）
    pub avg_latency_us: u64,
}

// ============================================================================
// 调度器
// ============================================================================

/// 调度器
///
/// 独占持有两个模式索引（`all` 与 `local_only`），注册与查找在
/// 非挂起的读写锁下完成；处理器在锁外执行。
pub struct Dispatcher {
    config: RpcConfig,
    all: RwLock<PatternIndex<HandlerRef>>,
    local_only: RwLock<PatternIndex<HandlerRef>>,
    transports: Arc<TransportRegistry>,
    event_bus: Arc<EventBus>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// 创建调度器
    pub fn new(
        config: RpcConfig,
        transports: Arc<TransportRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let order = config.match_order;
        Self {
            config,
            all: RwLock::new(PatternIndex::new(order)),
            local_only: RwLock::new(PatternIndex::new(order)),
            transports,
            event_bus,
            stats: DispatchStats::default(),
        }
    }

    // ========================================================================
    // 注册
    // ========================================================================

    /// 注册本地处理器
    pub fn add(&self, pattern: impl IntoPattern, handler: Arc<dyn ActHandler>) -> Result<()> {
        self.add_chain(pattern, vec![handler])
    }

    /// 注册本地处理器链
    ///
    /// 步骤顺序执行；某一步设置了头部的 `break` 字段时，后续步骤
    /// 不再执行，调用方拿到该步的结果。
    pub fn add_chain(&self, pattern: impl IntoPattern, steps: HandlerChain) -> Result<()> {
        if steps.is_empty() {
            return Err(RpcError::InitFailed("处理器链不能为空".to_string()));
        }
        let pattern = pattern.into_pattern()?;
        self.insert(pattern, HandlerRef::Local(steps))
    }

    /// 注册远程路由（由具名传输器执行）
    pub fn add_remote(
        &self,
        pattern: impl IntoPattern,
        transport: impl Into<String>,
    ) -> Result<()> {
        let pattern = pattern.into_pattern()?;
        self.insert(pattern, HandlerRef::Transport(transport.into()))
    }

    fn insert(&self, pattern: Pattern, payload: HandlerRef) -> Result<()> {
        let is_local = matches!(payload, HandlerRef::Local(_));

        let mut all = self.all.write().expect("索引锁中毒");
        if self.config.forbid_same_route_names && all.find_exact(&pattern).is_some() {
            return Err(RpcError::DuplicatePattern(beautify(&pattern)));
        }

        debug!(pattern = %beautify(&pattern), payload = ?payload, "注册模式");
        all.add(pattern.clone(), payload.clone());
        drop(all);

        if is_local {
            self.local_only
                .write()
                .expect("索引锁中毒")
                .add(pattern, payload);
        }
        Ok(())
    }

    /// 移除模式
    ///
    /// 从两个索引中删除第一个精确相等的条目；幂等。
    pub fn remove(&self, pattern: impl IntoPattern) -> Result<()> {
        let pattern = pattern.into_pattern()?;
        self.all.write().expect("索引锁中毒").remove(&pattern);
        self.local_only
            .write()
            .expect("索引锁中毒")
            .remove(&pattern);
        Ok(())
    }

    /// 已注册条目数 `(全部, 仅本地)`
    pub fn entry_counts(&self) -> (usize, usize) {
        (
            self.all.read().expect("索引锁中毒").len(),
            self.local_only.read().expect("索引锁中毒").len(),
        )
    }

    /// 调度统计快照
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // 调度
    // ========================================================================

    /// 执行一次调用
    pub async fn act(&self, pattern: impl IntoPattern) -> Result<Value> {
        self.act_with(pattern, Pattern::new()).await
    }

    /// 执行一次调用，附加覆盖部分
    ///
    /// 覆盖部分与基础模式合并（冲突时覆盖方胜出），结果同时携带
    /// 路由键和元标志。
    pub async fn act_with(
        &self,
        pattern: impl IntoPattern,
        overrides: impl IntoPattern,
    ) -> Result<Value> {
        let started = Instant::now();

        // 1. 组合请求模式并拆分
        let base = pattern.into_pattern()?;
        let extra = overrides.into_pattern()?;
        let (message, meta, raw) = split(vec![base, extra]);
        let pattern_str = beautify(&raw);

        let caller_set_timeout = meta.contains_key("timeout");
        let caller_set_debug = meta.contains_key("debug");
        let local_flag = meta.get("local").map(truthy).unwrap_or(false);

        // 2. 选择索引并查找（锁内不挂起）
        let looked_up = {
            let index = if local_flag {
                self.local_only.read().expect("索引锁中毒")
            } else {
                self.all.read().expect("索引锁中毒")
            };
            index.lookup(&raw)
        };

        let Some((matched, payload)) = looked_up else {
            debug!(pattern = %pattern_str, "未找到匹配的模式");
            return Err(RpcError::PatternNotFound(pattern_str));
        };

        // 3. 规范化头部
        let mut headers =
            Headers::normalize(&self.config.default_headers, meta, &message, &matched)?;
        if !caller_set_debug && self.config.debug {
            headers.debug = true;
        }

        // 4. 解析执行目标
        let (target, transport_name) = match payload {
            HandlerRef::Local(chain) => (Target::Chain(chain), None),
            HandlerRef::Transport(name) => {
                let transport = self
                    .transports
                    .get(&name)
                    .await
                    .ok_or_else(|| RpcError::NoSuchTransport(name.clone()))?;
                // 传输器声明的超时在调用方未指定时生效
                if !caller_set_timeout {
                    if let Some(ms) = transport.options().timeout {
                        headers.timeout = Some(ms);
                    }
                }
                (Target::Remote(transport), Some(name))
            }
        };

        // 5. 选择信封
        match (headers.nowait, target) {
            (true, Target::Chain(chain)) => {
                Ok(self.dispatch_nowait(chain, message, headers, raw, started))
            }
            (_, target) => {
                self.dispatch_await(target, message, headers, raw, pattern_str, transport_name, started)
                    .await
            }
        }
    }

    /// 即发即忘信封（本地处理器 + `$nowait`）
    ///
    /// 立即返回空结果（`$debug` 时返回追踪骨架）；处理器错误交给
    /// 分类器，只记日志，不向调用方抛出。
    fn dispatch_nowait(
        &self,
        chain: HandlerChain,
        message: Value,
        headers: Headers,
        source_pattern: Pattern,
        started: Instant,
    ) -> Value {
        let classifier = self.config.terminate_on.clone();
        let bus = Arc::clone(&self.event_bus);
        let transports = Arc::clone(&self.transports);
        let pattern_str = beautify(&source_pattern);

        let response = if headers.debug {
            debug_trace(Value::Null, &headers, started.elapsed().as_millis() as u64, None)
        } else {
            Value::Null
        };

        tokio::spawn(async move {
            let join = tokio::spawn(run_chain(chain, message.clone(), headers));
            match join.await {
                Ok((Ok(_), final_headers)) => {
                    fanout::deliver(&bus, &transports, &message, &final_headers, &source_pattern)
                        .await;
                }
                Ok((Err(e), _)) => classify_detached(&classifier, e, &pattern_str),
                Err(join_err) => {
                    let e = anyhow::Error::new(RpcError::HandlerPanic(panic_message(join_err)));
                    classify_detached(&classifier, e, &pattern_str);
                }
            }
        });

        self.stats
            .record(true, started.elapsed().as_micros() as u64, false);
        response
    }

    /// 等待信封
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_await(
        &self,
        target: Target,
        message: Value,
        headers: Headers,
        source_pattern: Pattern,
        pattern_str: String,
        transport_name: Option<String>,
        started: Instant,
    ) -> Result<Value> {
        // $timeout 为 0 或缺失时回退实例默认值; 只有两者同时为 0
        // 才会真正关闭超时竞速
        let timeout_ms = match headers.timeout {
            Some(ms) if ms > 0 => ms,
            _ => self.config.timeout_ms,
        };
        let headers_snapshot = headers.clone();

        // 信封跑在独立任务上: 超时只释放调用方, 任务继续执行
        let message_env = message.clone();
        let join = match target {
            Target::Chain(chain) => tokio::spawn(run_chain(chain, message_env, headers)),
            Target::Remote(transport) => tokio::spawn(async move {
                let mut headers = headers;
                let result = transport.send(message_env, &mut headers).await;
                (result, headers)
            }),
        };

        let joined = if timeout_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), join).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.stats
                        .record(false, started.elapsed().as_micros() as u64, true);
                    warn!(pattern = %pattern_str, timeout_ms, "模式调用超时");
                    return Err(RpcError::PatternTimeout {
                        pattern: pattern_str,
                        timeout_ms,
                    });
                }
            }
        } else {
            join.await
        };

        let (result, final_headers) = match joined {
            Ok(pair) => pair,
            Err(join_err) => (
                Err(anyhow::Error::new(RpcError::HandlerPanic(panic_message(
                    join_err,
                )))),
                headers_snapshot,
            ),
        };

        // 慢调用告警
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(threshold) = final_headers.slow.or(self.config.slow_pattern_timeout_ms) {
            if elapsed_ms > threshold {
                warn!(
                    pattern = %pattern_str,
                    elapsed_ms,
                    threshold_ms = threshold,
                    "慢调用"
                );
            }
        }

        match result {
            Ok(value) => {
                self.stats
                    .record(true, started.elapsed().as_micros() as u64, false);
                fanout::spawn(
                    Arc::clone(&self.event_bus),
                    Arc::clone(&self.transports),
                    message,
                    final_headers.clone(),
                    source_pattern,
                );
                if final_headers.debug {
                    Ok(debug_trace(
                        value,
                        &final_headers,
                        elapsed_ms,
                        transport_name.as_deref(),
                    ))
                } else {
                    Ok(value)
                }
            }
            Err(e) => {
                self.stats
                    .record(false, started.elapsed().as_micros() as u64, false);
                match self.config.terminate_on.classify(&e) {
                    ErrorDisposition::Fatal => {
                        error!(pattern = %pattern_str, error = %e, "致命错误, 进程即将中止");
                        std::process::exit(70);
                    }
                    ErrorDisposition::Mute => {
                        debug!(pattern = %pattern_str, error = %e, "错误被分类器静音");
                        Ok(Value::Null)
                    }
                    ErrorDisposition::Propagate => Err(RpcError::HandlerFailure {
                        pattern: pattern_str,
                        source: e,
                    }),
                }
            }
        }
    }
}

/// 顺序执行处理器链
///
/// 每一步拿到头部的独占引用；某步返回后若 `break` 已置位，链在
/// 此短路。返回最后执行步骤的结果与最终头部。
async fn run_chain(
    chain: HandlerChain,
    message: Value,
    mut headers: Headers,
) -> (anyhow::Result<Value>, Headers) {
    let mut result = Value::Null;
    for step in chain {
        match step.handle(message.clone(), &mut headers).await {
            Ok(value) => {
                result = value;
                if headers.break_chain {
                    break;
                }
            }
            Err(e) => return (Err(e), headers),
        }
    }
    (Ok(result), headers)
}

/// 脱钩路径的错误分类：只记日志，致命时中止进程
fn classify_detached(classifier: &Classifier, err: anyhow::Error, pattern_str: &str) {
    match classifier.classify(&err) {
        ErrorDisposition::Fatal => {
            error!(pattern = %pattern_str, error = %err, "致命错误, 进程即将中止");
            std::process::exit(70);
        }
        ErrorDisposition::Mute => {
            debug!(pattern = %pattern_str, error = %err, "错误被分类器静音");
        }
        ErrorDisposition::Propagate => {
            warn!(pattern = %pattern_str, error = %err, "即发即忘处理器失败");
        }
    }
}

/// 提取 panic 信息
fn panic_message(join_err: JoinError) -> String {
    if join_err.is_panic() {
        match join_err.try_into_panic() {
            Ok(payload) => {
                if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "未知 panic".to_string()
                }
            }
            Err(e) => e.to_string(),
        }
    } else {
        "处理器任务被取消".to_string()
    }
}

/// 构造调试追踪包装
fn debug_trace(value: Value, headers: &Headers, elapsed_ms: u64, transport: Option<&str>) -> Value {
    json!({
        "result": value,
        "trace": {
            "id": headers.id,
            "pattern": headers.pattern.as_ref().map(beautify),
            "elapsed_ms": elapsed_ms,
            "transport": transport,
        }
    })
}

/// 元标志的宽松真值判断
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim() == "true",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::MatchOrder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn dispatcher(config: RpcConfig) -> Dispatcher {
        Dispatcher::new(
            config,
            Arc::new(TransportRegistry::new()),
            Arc::new(EventBus::new()),
        )
    }

    fn sum_handler() -> Arc<dyn ActHandler> {
        handler_fn(|message, _headers| {
            let a = message["a"].as_i64().unwrap_or(0);
            let b = message["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        })
    }

    #[tokio::test]
    async fn test_act_dispatches_local_handler() {
        let d = dispatcher(RpcConfig::default());
        d.add(json!({"role": "math", "cmd": "sum"}), sum_handler())
            .unwrap();

        let result = d
            .act(json!({"role": "math", "cmd": "sum", "a": 2, "b": 3}))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_act_pattern_not_found() {
        let d = dispatcher(RpcConfig::default());
        let err = d.act("role:x").await.unwrap_err();
        assert!(matches!(err, RpcError::PatternNotFound(_)));
        assert!(err.to_string().contains("role:x"));
    }

    #[tokio::test]
    async fn test_act_string_pattern() {
        let d = dispatcher(RpcConfig::default());
        d.add(
            "role:echo",
            handler_fn(|message, _| Ok(message["role"].clone())),
        )
        .unwrap();

        let result = d.act("role:echo,extra:1").await.unwrap();
        assert_eq!(result, json!("echo"));
    }

    #[tokio::test]
    async fn test_depth_order_dispatches_deeper_pattern() {
        let d = dispatcher(RpcConfig::default());
        d.add("r:x", handler_fn(|_, _| Ok(json!("shallow")))).unwrap();
        d.add("r:x,k:1", handler_fn(|_, _| Ok(json!("deep")))).unwrap();

        assert_eq!(d.act("r:x,k:1").await.unwrap(), json!("deep"));
    }

    #[tokio::test]
    async fn test_insertion_order_dispatches_first() {
        let config = RpcConfig::builder().match_order(MatchOrder::Insertion).build();
        let d = dispatcher(config);
        d.add("r:x", handler_fn(|_, _| Ok(json!("first")))).unwrap();
        d.add("r:x", handler_fn(|_, _| Ok(json!("second")))).unwrap();

        assert_eq!(d.act("r:x").await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_timeout_releases_caller() {
        let d = dispatcher(RpcConfig::builder().timeout_ms(100).build());
        struct SlowHandler;
        #[async_trait]
        impl ActHandler for SlowHandler {
            async fn handle(&self, _m: Value, _h: &mut Headers) -> anyhow::Result<Value> {
                tokio::time::sleep(Duration::from_millis(400)).await;
                Ok(json!("late"))
            }
        }
        d.add("role:slow", Arc::new(SlowHandler)).unwrap();

        let started = Instant::now();
        let err = d.act("role:slow").await.unwrap_err();
        assert!(matches!(err, RpcError::PatternTimeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_caller_timeout_overrides_default() {
        let d = dispatcher(RpcConfig::builder().timeout_ms(50).build());
        struct SlowHandler;
        #[async_trait]
        impl ActHandler for SlowHandler {
            async fn handle(&self, _m: Value, _h: &mut Headers) -> anyhow::Result<Value> {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(json!("ok"))
            }
        }
        d.add("role:a", Arc::new(SlowHandler)).unwrap();

        let result = d.act("role:a,$timeout:2000").await.unwrap();
        assert_eq!(result, json!("ok"));
    }

    #[tokio::test]
    async fn test_zero_caller_timeout_uses_instance_default() {
        let d = dispatcher(RpcConfig::builder().timeout_ms(80).build());
        struct SlowHandler;
        #[async_trait]
        impl ActHandler for SlowHandler {
            async fn handle(&self, _m: Value, _h: &mut Headers) -> anyhow::Result<Value> {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(json!("late"))
            }
        }
        d.add("role:a", Arc::new(SlowHandler)).unwrap();

        let err = d.act("role:a,$timeout:0").await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::PatternTimeout { timeout_ms: 80, .. }
        ));
    }

    #[tokio::test]
    async fn test_handler_failure_propagates_with_cause() {
        let d = dispatcher(RpcConfig::default());
        d.add("role:a", handler_fn(|_, _| anyhow::bail!("下游拒绝")))
            .unwrap();

        let err = d.act("role:a").await.unwrap_err();
        match err {
            RpcError::HandlerFailure { source, .. } => {
                assert!(source.to_string().contains("下游拒绝"));
            }
            other => panic!("期望 HandlerFailure, 得到 {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mute_classifier_swallows_error() {
        let config = RpcConfig::builder()
            .terminate_on(Classifier::predicate(|_| ErrorDisposition::Mute))
            .build();
        let d = dispatcher(config);
        d.add("role:a", handler_fn(|_, _| anyhow::bail!("静音掉")))
            .unwrap();

        assert_eq!(d.act("role:a").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_break_short_circuits_chain() {
        let d = dispatcher(RpcConfig::default());
        let second_ran = Arc::new(AtomicUsize::new(0));
        let second_ran_clone = second_ran.clone();

        d.add_chain(
            "r:e",
            vec![
                handler_fn(|_, headers| {
                    headers.break_chain = true;
                    Ok(json!("stop"))
                }),
                handler_fn(move |_, _| {
                    second_ran_clone.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(json!("second"))
                }),
            ],
        )
        .unwrap();

        let result = d.act("r:e").await.unwrap();
        assert_eq!(result, json!("stop"));
        assert_eq!(second_ran.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_runs_all_steps_without_break() {
        let d = dispatcher(RpcConfig::default());
        d.add_chain(
            "r:c",
            vec![
                handler_fn(|_, _| Ok(json!("one"))),
                handler_fn(|_, _| Ok(json!("two"))),
            ],
        )
        .unwrap();

        assert_eq!(d.act("r:c").await.unwrap(), json!("two"));
    }

    #[tokio::test]
    async fn test_nowait_returns_immediately_and_logs_error() {
        let d = dispatcher(RpcConfig::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();

        d.add(
            "role:bg",
            handler_fn(move |_, _| {
                ran_clone.fetch_add(1, AtomicOrdering::SeqCst);
                anyhow::bail!("后台失败")
            }),
        )
        .unwrap();

        // 错误不抛给调用方
        let result = d.act("role:bg,$nowait:true").await.unwrap();
        assert_eq!(result, Value::Null);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_flag_restricts_to_local_index() {
        let d = dispatcher(RpcConfig::default());
        d.add_remote("role:remote", "http").unwrap();

        // 远程注册不在 local_only 索引里
        let err = d.act("role:remote,$local:true").await.unwrap_err();
        assert!(matches!(err, RpcError::PatternNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_transport_fails() {
        let d = dispatcher(RpcConfig::default());
        d.add_remote("role:remote", "http").unwrap();

        let err = d.act("role:remote").await.unwrap_err();
        assert!(matches!(err, RpcError::NoSuchTransport(name) if name == "http"));
    }

    #[tokio::test]
    async fn test_duplicate_pattern_forbidden() {
        let config = RpcConfig::builder().forbid_same_route_names().build();
        let d = dispatcher(config);
        d.add("role:a,cmd:b", handler_fn(|_, _| Ok(Value::Null)))
            .unwrap();

        let err = d
            .add("cmd:b,role:a", handler_fn(|_, _| Ok(Value::Null)))
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicatePattern(_)));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let d = dispatcher(RpcConfig::default());
        d.add("role:a", handler_fn(|_, _| Ok(Value::Null))).unwrap();

        d.remove("role:a").unwrap();
        d.remove("role:a").unwrap();
        assert_eq!(d.entry_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_debug_wraps_result_with_trace() {
        let d = dispatcher(RpcConfig::default());
        d.add("role:a", handler_fn(|_, _| Ok(json!(42)))).unwrap();

        let result = d.act("role:a,$debug:true").await.unwrap();
        assert_eq!(result["result"], json!(42));
        assert!(result["trace"]["id"].is_string());
        assert_eq!(result["trace"]["pattern"], json!("role:a"));
    }

    #[tokio::test]
    async fn test_stats_record_outcomes() {
        let d = dispatcher(RpcConfig::default());
        d.add("role:a", handler_fn(|_, _| Ok(Value::Null))).unwrap();
        d.add("role:b", handler_fn(|_, _| anyhow::bail!("失败")))
            .unwrap();

        d.act("role:a").await.unwrap();
        let _ = d.act("role:b").await;

        let stats = d.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
    }
}
