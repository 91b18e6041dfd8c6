//! 传输器模块
//!
//! 传输器是具名的外部协作者：`send` 执行请求/响应调用，`notify`
//! 投递事件且不等待回复。生命周期钩子全部可选（默认空实现）。
//! 具体传输实现（HTTP、AMQP 等）由插件提供，核心只持有契约。

pub mod registry;

pub use registry::TransportRegistry;

use async_trait::async_trait;
use serde_json::Value;

use crate::router::headers::Headers;

/// 传输器选项
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// 传输器声明的默认超时（毫秒）
    ///
    /// 调用方未设置 `$timeout` 时由调度器采纳。
    pub timeout: Option<u64>,
}

/// 生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// 建立出站连接
    Connect,
    /// 开始监听入站请求
    Listen,
    /// 断开出站连接
    Disconnect,
    /// 释放全部资源
    Close,
}

impl LifecycleEvent {
    /// 对应的钩子名
    pub fn method(&self) -> &'static str {
        match self {
            LifecycleEvent::Connect => "connect",
            LifecycleEvent::Listen => "listen",
            LifecycleEvent::Disconnect => "disconnect",
            LifecycleEvent::Close => "close",
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.method())
    }
}

/// 传输器契约
///
/// 实现方拥有自己的网络资源；核心只持有引用并驱动生命周期。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 传输器名称（注册键）
    fn name(&self) -> &str;

    /// 传输器选项
    fn options(&self) -> TransportOptions {
        TransportOptions::default()
    }

    /// 请求/响应调用
    async fn send(&self, message: Value, headers: &mut Headers) -> anyhow::Result<Value>;

    /// 投递事件，不等待回复
    async fn notify(&self, message: Value, headers: &Headers) -> anyhow::Result<()>;

    /// 建立出站连接
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 开始监听入站请求
    async fn listen(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 断开出站连接
    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 释放全部资源
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
