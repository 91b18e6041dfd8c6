//! 插件模块
//!
//! 插件是对实例求值一次的可调用对象，按返回值分类安装：
//! 传输器、具名路由包，或者什么都不装。字符串定位符通过外部
//! 注入的解析器求值（加载与打包不在核心职责内）。

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::api::sdk::RpcCore;
use crate::transport::Transport;

/// 插件返回值
pub enum PluginOutput {
    /// 安装一个传输器（名称来自传输器契约）
    Transport(Arc<dyn Transport>),
    /// 在实例的具名路由表下合并一组路由
    Routes {
        /// 路由包名称
        name: String,
        /// 路由内容（JSON 对象）
        routes: Value,
    },
    /// 无操作
    None,
}

/// 插件契约
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 用实例和选项初始化插件
    async fn init(&self, core: &RpcCore, options: Value) -> anyhow::Result<PluginOutput>;
}

/// 字符串定位符解析器
///
/// 解析本身是外部协作者；核心只消费这个接口。
pub trait PluginResolver: Send + Sync {
    /// 把定位符解析成插件
    fn resolve(&self, locator: &str) -> Option<Arc<dyn Plugin>>;
}
