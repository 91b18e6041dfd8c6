//! # Fries RPC - 薯条 RPC
//!
//! 薯条 RPC 是面向微服务网格的模式匹配 RPC 框架，提供以下核心功能：
//!
//! - **模式索引**: 子集匹配查找，可配置的深度/插入序决胜
//! - **调度系统**: 超时竞速、慢调用告警、即发即忘、错误分类的执行信封
//! - **传输系统**: 具名传输器与并行生命周期驱动
//! - **通知扇出**: 调用事件向订阅传输器和本地发射器的脱钩投递
//! - **插件系统**: 按返回值分类安装传输器或具名路由包
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use fries_rpc::{handler_fn, RpcConfig, RpcCore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = RpcCore::new(RpcConfig::default());
//!
//!     // 注册模式处理器
//!     core.add(
//!         json!({"role": "math", "cmd": "sum"}),
//!         handler_fn(|message, _headers| {
//!             let a = message["a"].as_i64().unwrap_or(0);
//!             let b = message["b"].as_i64().unwrap_or(0);
//!             Ok(json!(a + b))
//!         }),
//!     )?;
//!
//!     // 按模式调用
//!     let result = core
//!         .act(json!({"role": "math", "cmd": "sum", "a": 2, "b": 3}))
//!         .await?;
//!     assert_eq!(result, json!(5));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `pattern` - 模式数据结构、文法解析和子集匹配索引
//! - `router` - 调度器、头部规范化、事件总线和通知扇出
//! - `transport` - 传输器契约和注册表
//! - `plugin` - 插件契约
//! - `core` - 实例配置和错误分类器
//! - `utils` - 工具函数和错误类型
//! - `api` - 公共 SDK 接口

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod pattern;
pub mod plugin;
pub mod router;
pub mod transport;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::sdk::RpcCore;

pub use pattern::{
    beautify, parse, split, IntoPattern, LookupCacheStats, MatchOrder, Pattern, PatternIndex,
    PatternValue,
};

pub use router::{
    handler_fn, routing_key, ActHandler, DispatchStatsSnapshot, Event, EventBus, EventCallback,
    HandlerChain, HandlerRef, Headers, LOCAL_EMITTER,
};

pub use transport::{LifecycleEvent, Transport, TransportOptions, TransportRegistry};

pub use plugin::{Plugin, PluginOutput, PluginResolver};

pub use crate::core::config::{Classifier, ErrorDisposition, RpcConfig, RpcConfigBuilder};

pub use utils::{error_kind, status_code, Result, RpcError};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, RotationStrategy};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 协议版本
pub const PROTOCOL_VERSION: &str = "1.0";
