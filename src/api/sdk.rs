//! RpcCore SDK
//!
//! 薯条 RPC 的主要对外接口。提供统一的 API 访问框架的所有功能：
//!
//! - 注册系统：注册/移除模式处理器
//! - 调度系统：按模式发起调用
//! - 传输系统：注册传输器、驱动生命周期
//! - 插件系统：安装传输器或具名路由包
//! - 事件系统：订阅调用事件
//!
//! # 示例
//!
//! ```rust,no_run
//! use fries_rpc::{handler_fn, RpcConfig, RpcCore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = RpcCore::new(RpcConfig::default());
//!
//!     core.add(
//!         json!({"role": "math", "cmd": "sum"}),
//!         handler_fn(|message, _headers| {
//!             let a = message["a"].as_i64().unwrap_or(0);
//!             let b = message["b"].as_i64().unwrap_or(0);
//!             Ok(json!(a + b))
//!         }),
//!     )?;
//!
//!     let result = core
//!         .act(json!({"role": "math", "cmd": "sum", "a": 2, "b": 3}))
//!         .await?;
//!     assert_eq!(result, json!(5));
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use crate::core::config::RpcConfig;
use crate::pattern::IntoPattern;
use crate::plugin::{Plugin, PluginOutput, PluginResolver};
use crate::router::dispatcher::{ActHandler, DispatchStatsSnapshot, Dispatcher, HandlerChain};
use crate::router::event_bus::{EventBus, EventCallback};
use crate::transport::{LifecycleEvent, Transport, TransportRegistry};
use crate::utils::{Result, RpcError};

/// 薯条 RPC 实例
///
/// 整个框架的入口点。实例独占持有两个模式索引、传输器注册表和
/// 具名路由表；事件总线与实例同生命周期。
pub struct RpcCore {
    /// 实例配置
    config: RpcConfig,

    /// 调度器
    dispatcher: Arc<Dispatcher>,

    /// 传输器注册表
    transports: Arc<TransportRegistry>,

    /// 进程级事件总线
    event_bus: Arc<EventBus>,

    /// 具名路由表（插件安装）
    routes: RwLock<HashMap<String, Value>>,

    /// 插件定位符解析器
    resolver: RwLock<Option<Arc<dyn PluginResolver>>>,
}

impl RpcCore {
    /// 创建实例
    pub fn new(config: RpcConfig) -> Self {
        let transports = Arc::new(TransportRegistry::new());
        let event_bus = Arc::new(EventBus::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            Arc::clone(&transports),
            Arc::clone(&event_bus),
        ));

        info!(
            match_order = ?config.match_order,
            timeout_ms = config.timeout_ms,
            "创建薯条 RPC 实例"
        );

        Self {
            config,
            dispatcher,
            transports,
            event_bus,
            routes: RwLock::new(HashMap::new()),
            resolver: RwLock::new(None),
        }
    }

    /// 使用默认配置创建实例
    pub fn with_defaults() -> Self {
        Self::new(RpcConfig::default())
    }

    /// 实例配置
    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    // ========================================================================
    // 注册 API
    // ========================================================================

    /// 注册本地处理器
    pub fn add(&self, pattern: impl IntoPattern, handler: Arc<dyn ActHandler>) -> Result<()> {
        self.dispatcher.add(pattern, handler)
    }

    /// 注册本地处理器链
    pub fn add_chain(&self, pattern: impl IntoPattern, steps: HandlerChain) -> Result<()> {
        self.dispatcher.add_chain(pattern, steps)
    }

    /// 注册远程路由（由具名传输器执行）
    pub fn add_remote(
        &self,
        pattern: impl IntoPattern,
        transport: impl Into<String>,
    ) -> Result<()> {
        self.dispatcher.add_remote(pattern, transport)
    }

    /// 移除模式（幂等）
    pub fn remove(&self, pattern: impl IntoPattern) -> Result<()> {
        self.dispatcher.remove(pattern)
    }

    // ========================================================================
    // 调度 API
    // ========================================================================

    /// 执行一次调用
    pub async fn act(&self, pattern: impl IntoPattern) -> Result<Value> {
        self.dispatcher.act(pattern).await
    }

    /// 执行一次调用，附加覆盖部分
    pub async fn act_with(
        &self,
        pattern: impl IntoPattern,
        overrides: impl IntoPattern,
    ) -> Result<Value> {
        self.dispatcher.act_with(pattern, overrides).await
    }

    // ========================================================================
    // 插件 API
    // ========================================================================

    /// 设置插件定位符解析器
    pub fn set_plugin_resolver(&self, resolver: Arc<dyn PluginResolver>) {
        let mut slot = self.resolver.write().expect("解析器锁中毒");
        *slot = Some(resolver);
    }

    /// 安装插件
    ///
    /// 调用插件并按返回值分类：传输器被注册，具名路由包被合并到
    /// 路由表，空返回是无操作。
    pub async fn use_plugin(&self, plugin: Arc<dyn Plugin>, options: Value) -> Result<()> {
        let output = plugin
            .init(self, options)
            .await
            .map_err(|e| RpcError::InvalidPlugin(format!("插件初始化失败: {}", e)))?;

        match output {
            PluginOutput::Transport(transport) => {
                self.transports.register(transport).await?;
            }
            PluginOutput::Routes { name, routes } => {
                let mut table = self.routes.write().expect("路由表锁中毒");
                match (table.get_mut(&name), routes) {
                    (Some(Value::Object(existing)), Value::Object(incoming)) => {
                        existing.extend(incoming);
                    }
                    (_, routes) => {
                        table.insert(name.clone(), routes);
                    }
                }
                info!(name = %name, "插件路由包已合并");
            }
            PluginOutput::None => {
                debug!("插件无输出");
            }
        }
        Ok(())
    }

    /// 通过字符串定位符安装插件
    ///
    /// # Errors
    ///
    /// 未配置解析器或解析失败时返回 `RpcError::InvalidPlugin`。
    pub async fn use_named(&self, locator: &str, options: Value) -> Result<()> {
        let resolver = {
            let slot = self.resolver.read().expect("解析器锁中毒");
            slot.clone()
        };
        let resolver = resolver.ok_or_else(|| {
            RpcError::InvalidPlugin(format!("未配置插件解析器, 无法解析 '{}'", locator))
        })?;
        let plugin = resolver
            .resolve(locator)
            .ok_or_else(|| RpcError::InvalidPlugin(format!("无法解析插件 '{}'", locator)))?;

        self.use_plugin(plugin, options).await
    }

    /// 具名路由表快照
    pub fn routes(&self) -> HashMap<String, Value> {
        self.routes.read().expect("路由表锁中毒").clone()
    }

    // ========================================================================
    // 传输器 API
    // ========================================================================

    /// 直接注册传输器
    pub async fn register_transport(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.transports.register(transport).await
    }

    /// 已注册的传输器名称
    pub async fn transport_names(&self) -> Vec<String> {
        self.transports.names().await
    }

    /// 在所有传输器上建立出站连接
    pub async fn connect(&self) -> Result<()> {
        self.transports.run_lifecycle(LifecycleEvent::Connect).await
    }

    /// 所有传输器开始监听入站请求
    pub async fn listen(&self) -> Result<()> {
        self.transports.run_lifecycle(LifecycleEvent::Listen).await
    }

    /// 断开所有传输器的出站连接
    pub async fn disconnect(&self) -> Result<()> {
        self.transports
            .run_lifecycle(LifecycleEvent::Disconnect)
            .await
    }

    /// 释放所有传输器资源
    pub async fn close(&self) -> Result<()> {
        self.transports.run_lifecycle(LifecycleEvent::Close).await
    }

    // ========================================================================
    // 事件 API
    // ========================================================================

    /// 事件总线引用
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// 订阅调用事件
    ///
    /// 主题是点分路由键模式（见事件总线模块文档）。
    pub async fn subscribe(&self, topic: impl Into<String>, callback: EventCallback) -> String {
        self.event_bus.subscribe(topic, callback).await
    }

    // ========================================================================
    // 观测 API
    // ========================================================================

    /// 调度统计快照
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }

    /// 已注册条目数 `(全部, 仅本地)`
    pub fn entry_counts(&self) -> (usize, usize) {
        self.dispatcher.entry_counts()
    }
}
