//! 传输器注册表
//!
//! 具名传输器的存储，并行驱动生命周期钩子。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::{LifecycleEvent, Transport};
use crate::utils::{Result, RpcError};

/// 传输器注册表
///
/// 写入方：插件安装；读取方：调度与生命周期驱动。
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// 注册传输器
    ///
    /// # Errors
    ///
    /// 名称已被占用时返回 `RpcError::DuplicateTransport`。
    pub async fn register(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let name = transport.name().to_string();
        let mut transports = self.transports.write().await;
        if transports.contains_key(&name) {
            return Err(RpcError::DuplicateTransport(name));
        }

        info!(transport = %name, "注册传输器");
        transports.insert(name, transport);
        Ok(())
    }

    /// 按名称获取传输器
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.read().await.get(name).cloned()
    }

    /// 已注册的传输器名称
    pub async fn names(&self) -> Vec<String> {
        self.transports.read().await.keys().cloned().collect()
    }

    /// 传输器数量
    pub async fn len(&self) -> usize {
        self.transports.read().await.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.transports.read().await.is_empty()
    }

    /// 在所有传输器上并行驱动一个生命周期钩子
    ///
    /// 等待全部完成后返回；有失败时记录每个失败并重新抛出第一个
    /// （不做快速失败，后续钩子照常执行完毕）。
    pub async fn run_lifecycle(&self, event: LifecycleEvent) -> Result<()> {
        let transports: Vec<Arc<dyn Transport>> =
            self.transports.read().await.values().cloned().collect();

        if transports.is_empty() {
            debug!(method = %event, "无传输器, 跳过生命周期");
            return Ok(());
        }

        debug!(method = %event, count = transports.len(), "驱动生命周期钩子");

        let hooks = transports.iter().map(|t| {
            let name = t.name().to_string();
            async move {
                let outcome = match event {
                    LifecycleEvent::Connect => t.connect().await,
                    LifecycleEvent::Listen => t.listen().await,
                    LifecycleEvent::Disconnect => t.disconnect().await,
                    LifecycleEvent::Close => t.close().await,
                };
                (name, outcome)
            }
        });

        let mut first_failure = None;
        for (name, outcome) in futures::future::join_all(hooks).await {
            if let Err(e) = outcome {
                error!(transport = %name, method = %event, error = %e, "生命周期钩子失败");
                if first_failure.is_none() {
                    first_failure =
                        Some(e.context(format!("传输器 '{}' 的 {} 钩子失败", name, event)));
                }
            }
        }

        match first_failure {
            Some(e) => Err(RpcError::Other(e)),
            None => Ok(()),
        }
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
