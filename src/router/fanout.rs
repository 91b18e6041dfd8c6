//! 通知扇出
//!
//! 调度成功后，把事件推送给 `notify` 名单中的订阅传输器和本进程
//! 发射器。扇出与调用方的结果完全脱钩：调用方先拿到结果，投递
//! 失败只记日志，永不向上传播。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::event_bus::{Event, EventBus};
use super::headers::{Headers, LOCAL_EMITTER};
use crate::pattern::{Pattern, PatternValue};
use crate::transport::TransportRegistry;

/// 路由键的默认通配标记
pub const WILDCARD_TOKEN: &str = "*";

/// 本进程发射器主题使用的通配标记
pub const LOCAL_WILDCARD_TOKEN: &str = "#";

/// 从模式构造点分路由键
///
/// 键按字典序排列，每个非元键生成 `key.value` 段后用 `.` 连接；
/// 通配值渲染为给定的标记。
///
/// # Example
///
/// ```
/// use fries_rpc::pattern::parse;
/// use fries_rpc::router::fanout::routing_key;
///
/// let p = parse("role:math,cmd:sum").unwrap();
/// assert_eq!(routing_key(&p, "*"), "cmd.sum.role.math");
/// ```
pub fn routing_key(pattern: &Pattern, wildcard_token: &str) -> String {
    let mut segments = Vec::new();
    for (key, value) in pattern.iter() {
        if Pattern::is_meta_key(key) {
            continue;
        }
        let rendered = match value {
            PatternValue::Wildcard(_) => wildcard_token.to_string(),
            other => other.render(),
        };
        segments.push(format!("{}.{}", key, rendered));
    }
    segments.join(".")
}

/// 派生脱钩的扇出任务
///
/// `notify` 为空时不产生任务。后台任务持有扇出的所有权，
/// 调用方的结果先于扇出完成可见。
pub(crate) fn spawn(
    bus: Arc<EventBus>,
    transports: Arc<TransportRegistry>,
    message: Value,
    headers: Headers,
    source_pattern: Pattern,
) {
    let has_targets = headers.notify.as_ref().map(|n| !n.is_empty()).unwrap_or(false);
    if !has_targets {
        return;
    }

    tokio::spawn(async move {
        deliver(&bus, &transports, &message, &headers, &source_pattern).await;
    });
}

/// 逐个投递通知
///
/// `"local"` 发布到事件总线（主题用 `#` 渲染通配值），其余名称
/// 调用对应传输器的 `notify` 钩子。
pub(crate) async fn deliver(
    bus: &EventBus,
    transports: &TransportRegistry,
    message: &Value,
    headers: &Headers,
    source_pattern: &Pattern,
) {
    let Some(ref names) = headers.notify else {
        return;
    };

    for name in names {
        if name == LOCAL_EMITTER {
            let topic = routing_key(source_pattern, LOCAL_WILDCARD_TOKEN);
            let delivered = bus
                .publish(Event::new(topic.clone(), message.clone(), headers.clone()))
                .await;
            debug!(topic = %topic, subscribers = delivered, "事件已发布到本地发射器");
            continue;
        }

        match transports.get(name).await {
            Some(transport) => {
                if let Err(e) = transport.notify(message.clone(), headers).await {
                    warn!(transport = %name, error = %e, "通知投递失败");
                }
            }
            None => {
                warn!(transport = %name, "通知目标传输器未注册");
            }
        }
    }
}
