//! 日志系统模块
//!
//! 基于 tracing 生态的结构化日志：
//!
//! - 多级别日志（TRACE, DEBUG, INFO, WARN, ERROR）
//! - JSON 格式输出（可选）
//! - 文件日志输出（异步非阻塞，按时间轮转）
//! - `RUST_LOG` 环境变量过滤
//!
//! # 示例
//!
//! ```rust,no_run
//! use fries_rpc::utils::logger::{Logger, LoggerConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let _guard = Logger::init(LoggerConfig::default())?;
//!     tracing::info!(pattern = "role:math, cmd:sum", "调用完成");
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::utils::{Result, RpcError};

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    /// 不轮转（单个日志文件）
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// 日志级别（trace/debug/info/warn/error）
    #[serde(default = "default_level")]
    pub level: String,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志文件目录（设置后启用文件输出）
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 日志轮转策略
    #[serde(default)]
    pub rotation: RotationStrategy,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
            log_dir: None,
            rotation: RotationStrategy::default(),
        }
    }
}

/// 日志守卫
///
/// 持有异步写入线程的守卫；drop 时冲刷剩余日志。
/// 调用方需要在程序生命周期内持有它。
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// 日志系统入口
pub struct Logger;

impl Logger {
    /// 初始化全局日志订阅器
    ///
    /// 重复初始化返回 `RpcError::InitFailed`。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let (file_layer, worker) = match config.log_dir {
            Some(ref dir) => {
                let appender = RollingFileAppender::new(
                    config.rotation.to_rotation(),
                    dir,
                    "fries-rpc.log",
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let registry = tracing_subscriber::registry().with(filter).with(file_layer);

        let init_result = if config.json_format {
            registry
                .with(fmt::layer().json().with_writer(io::stdout))
                .try_init()
        } else {
            registry.with(fmt::layer().with_writer(io::stdout)).try_init()
        };

        init_result.map_err(|e| RpcError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        Ok(LogGuard { _worker: worker })
    }
}
