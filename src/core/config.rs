//! 实例配置
//!
//! 定义构造期配置结构、加载逻辑，以及错误分类器。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::pattern::MatchOrder;
use crate::utils::logger::LoggerConfig;
use crate::utils::{error_kind, Result, RpcError};

// ============================================================================
// 错误分类器
// ============================================================================

/// 错误处置结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// 记录后中止进程
    Fatal,
    /// 吞掉错误，调用返回空结果
    Mute,
    /// 作为处理器失败透传给调用方
    Propagate,
}

/// 分类器谓词类型
pub type ClassifierFn = Arc<dyn Fn(&anyhow::Error) -> ErrorDisposition + Send + Sync>;

/// 错误分类器
///
/// 执行信封内抛出的每个错误都会经过分类器。名单形式按错误种类
/// 码判定致命；谓词形式任意。
#[derive(Clone)]
pub enum Classifier {
    /// 致命错误种类码名单
    Kinds(HashSet<String>),
    /// 任意谓词
    Predicate(ClassifierFn),
}

impl Classifier {
    /// 从种类码名单构建
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Classifier::Kinds(kinds.into_iter().map(Into::into).collect())
    }

    /// 从谓词构建
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&anyhow::Error) -> ErrorDisposition + Send + Sync + 'static,
    {
        Classifier::Predicate(Arc::new(f))
    }

    /// 分类一个处理器错误
    pub fn classify(&self, err: &anyhow::Error) -> ErrorDisposition {
        match self {
            Classifier::Kinds(set) => {
                if set.contains(error_kind_of(err)) {
                    ErrorDisposition::Fatal
                } else {
                    ErrorDisposition::Propagate
                }
            }
            Classifier::Predicate(f) => f(err),
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        // 处理器 panic 是 Rust 里程序员错误的对应物
        Classifier::kinds([error_kind::HANDLER_PANIC])
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classifier::Kinds(set) => f.debug_tuple("Kinds").field(set).finish(),
            Classifier::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// 提取错误的种类码
///
/// 能向下转型为 [`RpcError`] 时用其种类码，否则视为处理器失败。
pub fn error_kind_of(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<RpcError>()
        .map(|e| e.kind())
        .unwrap_or(error_kind::HANDLER_FAILURE)
}

// ============================================================================
// 实例配置
// ============================================================================

/// 实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// 匹配顺序
    #[serde(default)]
    pub match_order: MatchOrder,

    /// 默认每次调用超时（毫秒），0 表示不限
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// 全局调试标志
    #[serde(default)]
    pub debug: bool,

    /// 慢调用告警阈值（毫秒）
    #[serde(default)]
    pub slow_pattern_timeout_ms: Option<u64>,

    /// 注册时拒绝精确重复的模式
    #[serde(default)]
    pub forbid_same_route_names: bool,

    /// 框架默认头部（每次调用合并的最左来源）
    #[serde(default = "default_headers")]
    pub default_headers: Value,

    /// 错误分类器
    #[serde(skip, default)]
    pub terminate_on: Classifier,

    /// 日志配置
    #[serde(default)]
    pub log: LoggerConfig,
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_headers() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            match_order: MatchOrder::default(),
            timeout_ms: default_timeout_ms(),
            debug: false,
            slow_pattern_timeout_ms: None,
            forbid_same_route_names: false,
            default_headers: default_headers(),
            terminate_on: Classifier::default(),
            log: LoggerConfig::default(),
        }
    }
}

impl RpcConfig {
    /// 创建配置构建器
    pub fn builder() -> RpcConfigBuilder {
        RpcConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// `.json` 扩展名按 JSON 解析，其余按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            RpcError::ConfigLoadFailed(format!("读取 {} 失败: {}", path.display(), e))
        })?;

        let config: RpcConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        Ok(config)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct RpcConfigBuilder {
    config: RpcConfig,
}

impl RpcConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: RpcConfig::default(),
        }
    }

    /// 设置匹配顺序
    pub fn match_order(mut self, order: MatchOrder) -> Self {
        self.config.match_order = order;
        self
    }

    /// 设置默认超时（毫秒）
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    /// 启用全局调试
    pub fn debug(mut self) -> Self {
        self.config.debug = true;
        self
    }

    /// 设置慢调用告警阈值（毫秒）
    pub fn slow_pattern_timeout_ms(mut self, threshold_ms: u64) -> Self {
        self.config.slow_pattern_timeout_ms = Some(threshold_ms);
        self
    }

    /// 注册时拒绝精确重复的模式
    pub fn forbid_same_route_names(mut self) -> Self {
        self.config.forbid_same_route_names = true;
        self
    }

    /// 设置一个框架默认头部字段
    pub fn default_header(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Value::Object(ref mut map) = self.config.default_headers {
            map.insert(key.into(), value);
        }
        self
    }

    /// 设置错误分类器
    pub fn terminate_on(mut self, classifier: Classifier) -> Self {
        self.config.terminate_on = classifier;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log.level = level.into();
        self
    }

    /// 构建配置
    pub fn build(self) -> RpcConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RpcConfig::default();
        assert_eq!(config.match_order, MatchOrder::Depth);
        assert_eq!(config.timeout_ms, 500);
        assert!(!config.debug);
        assert!(config.slow_pattern_timeout_ms.is_none());
        assert!(!config.forbid_same_route_names);
    }

    #[test]
    fn test_config_builder() {
        let config = RpcConfig::builder()
            .match_order(MatchOrder::Insertion)
            .timeout_ms(1000)
            .debug()
            .slow_pattern_timeout_ms(200)
            .forbid_same_route_names()
            .default_header("slow", serde_json::json!(100))
            .log_level("debug")
            .build();

        assert_eq!(config.match_order, MatchOrder::Insertion);
        assert_eq!(config.timeout_ms, 1000);
        assert!(config.debug);
        assert_eq!(config.slow_pattern_timeout_ms, Some(200));
        assert!(config.forbid_same_route_names);
        assert_eq!(config.default_headers["slow"], serde_json::json!(100));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_config_yaml_roundtrip() {
        let config = RpcConfig::builder()
            .match_order(MatchOrder::Insertion)
            .timeout_ms(800)
            .build();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: RpcConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.match_order, MatchOrder::Insertion);
        assert_eq!(parsed.timeout_ms, 800);
    }

    #[test]
    fn test_classifier_kinds_fatal() {
        let classifier = Classifier::kinds(["HANDLER_PANIC"]);
        let panic_err = anyhow::Error::new(RpcError::HandlerPanic("boom".to_string()));
        assert_eq!(classifier.classify(&panic_err), ErrorDisposition::Fatal);

        let plain = anyhow::anyhow!("普通失败");
        assert_eq!(classifier.classify(&plain), ErrorDisposition::Propagate);
    }

    #[test]
    fn test_classifier_predicate() {
        let classifier = Classifier::predicate(|err| {
            if err.to_string().contains("忽略") {
                ErrorDisposition::Mute
            } else {
                ErrorDisposition::Propagate
            }
        });

        assert_eq!(
            classifier.classify(&anyhow::anyhow!("可忽略的小问题")),
            ErrorDisposition::Mute
        );
        assert_eq!(
            classifier.classify(&anyhow::anyhow!("严重问题")),
            ErrorDisposition::Propagate
        );
    }

    #[test]
    fn test_error_kind_of() {
        let err = anyhow::Error::new(RpcError::PatternNotFound("role:x".to_string()));
        assert_eq!(error_kind_of(&err), "PATTERN_NOT_FOUND");
        assert_eq!(error_kind_of(&anyhow::anyhow!("x")), "HANDLER_FAILURE");
    }
}
