//! 进程级事件总线
//!
//! 以点分路由键为主题的发布/订阅枢纽，生命周期与实例一致。
//! 订阅者之间相互隔离：单个订阅者 panic 或超时不影响其他订阅者，
//! 也永远不会传播给发布方。
//!
//! # 主题匹配
//!
//! - `*` 单独出现匹配一切
//! - 尾部 `.*` 匹配任意非空后缀
//! - 任一侧的 `#` 段匹配任意单段（路由键用 `#` 渲染通配值）
//! - 其余按段精确相等

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::headers::Headers;
use crate::utils::id::generate_uuid;
use crate::utils::{Result, RpcError};

/// 默认订阅者处理超时时间（秒）
const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 5;

/// 事件回调函数类型
///
/// 回调必须线程安全，可能在多个任务中并发调用。
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// 总线上流转的事件
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// 事件唯一标识（UUID v4）
    pub event_id: String,

    /// 点分路由键
    pub topic: String,

    /// 事件消息体
    pub message: Value,

    /// 产生该事件的调用头部
    pub headers: Headers,

    /// 事件时间戳
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// 创建新事件
    pub fn new(topic: impl Into<String>, message: Value, headers: Headers) -> Self {
        Self {
            event_id: generate_uuid(),
            topic: topic.into(),
            message,
            headers,
            timestamp: Utc::now(),
        }
    }
}

/// 内部订阅条目
#[derive(Clone)]
struct SubscriptionEntry {
    /// 订阅唯一标识
    subscription_id: String,

    /// 订阅的主题模式
    topic: String,

    /// 事件回调函数
    callback: EventCallback,
}

/// 事件总线配置
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// 订阅者处理超时时间
    pub handler_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(DEFAULT_HANDLER_TIMEOUT_SECS),
        }
    }
}

/// 分发结果
#[derive(Debug, Clone)]
enum DispatchResult {
    Success,
    Failed(String),
    Timeout,
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<SubscriptionEntry>>>,
    config: EventBusConfig,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// 使用自定义配置创建事件总线
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    /// 订阅主题
    ///
    /// # Arguments
    ///
    /// * `topic` - 主题模式（见模块文档的匹配规则）
    /// * `callback` - 事件回调函数
    ///
    /// # Returns
    ///
    /// 返回订阅 ID，用于后续取消订阅
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        callback: EventCallback,
    ) -> String {
        let entry = SubscriptionEntry {
            subscription_id: generate_uuid(),
            topic: topic.into(),
            callback,
        };
        let subscription_id = entry.subscription_id.clone();

        let mut subscriptions = self.subscriptions.write().await;
        debug!(
            subscription_id = %subscription_id,
            topic = %entry.topic,
            "事件订阅成功"
        );
        subscriptions.push(entry);

        subscription_id
    }

    /// 取消订阅
    ///
    /// # Errors
    ///
    /// 订阅不存在时返回 `RpcError::SubscriptionNotFound`。
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.subscription_id != subscription_id);

        if subscriptions.len() == before {
            return Err(RpcError::SubscriptionNotFound(subscription_id.to_string()));
        }

        debug!(subscription_id = %subscription_id, "取消订阅成功");
        Ok(())
    }

    /// 当前订阅数量
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// 异步发布事件
    ///
    /// 事件被分发给所有匹配的订阅者，不等待处理完成。
    /// 返回匹配的订阅者数量。
    pub async fn publish(&self, event: Event) -> usize {
        let matching = self.find_matching(&event.topic).await;
        if matching.is_empty() {
            trace!(topic = %event.topic, "没有匹配的订阅者");
            return 0;
        }

        let count = matching.len();
        for sub in matching {
            let event = event.clone();
            let handler_timeout = self.config.handler_timeout;
            tokio::spawn(async move {
                let result =
                    Self::invoke_with_timeout(sub.callback, event, handler_timeout).await;
                Self::log_result(&sub.subscription_id, result);
            });
        }

        count
    }

    /// 同步发布事件
    ///
    /// 等待所有匹配的订阅者处理完成，返回 `(成功数, 失败数, 超时数)`。
    pub async fn publish_sync(&self, event: Event) -> (usize, usize, usize) {
        let matching = self.find_matching(&event.topic).await;
        if matching.is_empty() {
            return (0, 0, 0);
        }

        let handler_timeout = self.config.handler_timeout;
        let tasks: Vec<_> = matching
            .into_iter()
            .map(|sub| {
                let event = event.clone();
                tokio::spawn(async move {
                    let result =
                        Self::invoke_with_timeout(sub.callback, event, handler_timeout).await;
                    Self::log_result(&sub.subscription_id, result.clone());
                    result
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        let mut successful = 0;
        let mut failed = 0;
        let mut timeouts = 0;
        for result in results {
            match result {
                Ok(DispatchResult::Success) => successful += 1,
                Ok(DispatchResult::Failed(_)) | Err(_) => failed += 1,
                Ok(DispatchResult::Timeout) => timeouts += 1,
            }
        }
        (successful, failed, timeouts)
    }

    /// 收集匹配主题的订阅
    async fn find_matching(&self, topic: &str) -> Vec<SubscriptionEntry> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .iter()
            .filter(|s| matches_topic(&s.topic, topic))
            .cloned()
            .collect()
    }

    /// 带超时的回调调用
    ///
    /// 回调是同步的，放到专用线程执行并用 `catch_unwind` 捕获
    /// panic；超时后不再等待其结果。
    async fn invoke_with_timeout(
        callback: EventCallback,
        event: Event,
        timeout_duration: Duration,
    ) -> DispatchResult {
        let result = timeout(timeout_duration, async move {
            tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                    callback(event);
                }))
            })
            .await
        })
        .await;

        match result {
            Ok(Ok(Ok(()))) => DispatchResult::Success,
            Ok(Ok(Err(_))) => DispatchResult::Failed("回调函数 panic".to_string()),
            Ok(Err(e)) => DispatchResult::Failed(format!("任务执行失败: {}", e)),
            Err(_) => DispatchResult::Timeout,
        }
    }

    fn log_result(subscription_id: &str, result: DispatchResult) {
        match result {
            DispatchResult::Success => {
                trace!(subscription_id = %subscription_id, "事件处理成功");
            }
            DispatchResult::Failed(e) => {
                warn!(subscription_id = %subscription_id, error = %e, "事件处理失败");
            }
            DispatchResult::Timeout => {
                warn!(subscription_id = %subscription_id, "事件处理超时");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 主题匹配（见模块文档）
pub fn matches_topic(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern_segs: Vec<&str> = pattern.split('.').collect();
    let topic_segs: Vec<&str> = topic.split('.').collect();

    // 尾部 .* 匹配任意非空后缀
    if pattern_segs.last() == Some(&"*") {
        let head = &pattern_segs[..pattern_segs.len() - 1];
        return topic_segs.len() > head.len()
            && head
                .iter()
                .zip(topic_segs.iter())
                .all(|(p, t)| segment_matches(p, t));
    }

    pattern_segs.len() == topic_segs.len()
        && pattern_segs
            .iter()
            .zip(topic_segs.iter())
            .all(|(p, t)| segment_matches(p, t))
}

fn segment_matches(pattern_seg: &str, topic_seg: &str) -> bool {
    pattern_seg == topic_seg || pattern_seg == "#" || topic_seg == "#"
}
