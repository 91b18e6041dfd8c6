//! 薯条 RPC 错误类型定义
//!
//! 本模块定义了框架核心暴露的所有错误类型。

use thiserror::Error;

/// 薯条 RPC 核心错误类型
#[derive(Error, Debug)]
pub enum RpcError {
    // ==================== 调度错误 ====================

    /// 没有已注册的模式匹配该请求
    #[error("未找到匹配的模式: {0}")]
    PatternNotFound(String),

    /// 调用超时
    #[error("模式调用超时: '{pattern}' 超过 {timeout_ms}ms")]
    PatternTimeout {
        /// 美化后的请求模式
        pattern: String,
        /// 生效的超时时间（毫秒）
        timeout_ms: u64,
    },

    /// 元标志不符合头部模式
    #[error("头部校验失败: {0}")]
    InvalidHeaders(String),

    /// 处理器执行失败（分类器放行后透传）
    #[error("处理器执行失败: '{pattern}'")]
    HandlerFailure {
        /// 美化后的请求模式
        pattern: String,
        /// 原始错误
        #[source]
        source: anyhow::Error,
    },

    /// 处理器 panic（执行信封捕获）
    #[error("处理器 panic: {0}")]
    HandlerPanic(String),

    // ==================== 注册错误 ====================

    /// 精确重复的模式（forbid_same_route_names 开启时）
    #[error("模式已注册: {0}")]
    DuplicatePattern(String),

    /// 引用的传输器不存在
    #[error("传输器未注册: '{0}'")]
    NoSuchTransport(String),

    /// 传输器名称被重复使用
    #[error("传输器已注册: '{0}'")]
    DuplicateTransport(String),

    /// 插件解析未产生可调用对象
    #[error("无效插件: {0}")]
    InvalidPlugin(String),

    // ==================== 模式解析错误 ====================

    /// 模式字符串不符合文法
    #[error("模式解析失败: {0}")]
    PatternParse(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    // ==================== 事件系统错误 ====================

    /// 订阅未找到
    #[error("订阅未找到: '{0}'")]
    SubscriptionNotFound(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 框架操作结果类型别名
pub type Result<T> = std::result::Result<T, RpcError>;

/// 错误种类码常量
///
/// 与协议层约定的字符串错误码，供分类器的名单形式匹配。
pub mod error_kind {
    /// 没有匹配的模式
    pub const PATTERN_NOT_FOUND: &str = "PATTERN_NOT_FOUND";
    /// 调用超时
    pub const PATTERN_TIMEOUT: &str = "PATTERN_TIMEOUT";
    /// 头部校验失败
    pub const INVALID_HEADERS: &str = "INVALID_HEADERS";
    /// 传输器未注册
    pub const NO_SUCH_TRANSPORT: &str = "NO_SUCH_TRANSPORT";
    /// 模式重复注册
    pub const DUPLICATE_PATTERN: &str = "DUPLICATE_PATTERN";
    /// 传输器重复注册
    pub const DUPLICATE_TRANSPORT: &str = "DUPLICATE_TRANSPORT";
    /// 无效插件
    pub const INVALID_PLUGIN: &str = "INVALID_PLUGIN";
    /// 处理器执行失败
    pub const HANDLER_FAILURE: &str = "HANDLER_FAILURE";
    /// 处理器 panic
    pub const HANDLER_PANIC: &str = "HANDLER_PANIC";
}

/// 状态码常量
pub mod status_code {
    /// 成功
    pub const OK: u16 = 200;

    /// 请求格式错误
    pub const BAD_REQUEST: u16 = 400;

    /// 未找到
    pub const NOT_FOUND: u16 = 404;

    /// 请求超时
    pub const TIMEOUT: u16 = 408;

    /// 冲突
    pub const CONFLICT: u16 = 409;

    /// 内部错误
    pub const INTERNAL_ERROR: u16 = 500;
}

impl RpcError {
    /// 获取错误种类码
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::PatternNotFound(_) => error_kind::PATTERN_NOT_FOUND,
            RpcError::PatternTimeout { .. } => error_kind::PATTERN_TIMEOUT,
            RpcError::InvalidHeaders(_) => error_kind::INVALID_HEADERS,
            RpcError::NoSuchTransport(_) => error_kind::NO_SUCH_TRANSPORT,
            RpcError::DuplicatePattern(_) => error_kind::DUPLICATE_PATTERN,
            RpcError::DuplicateTransport(_) => error_kind::DUPLICATE_TRANSPORT,
            RpcError::InvalidPlugin(_) => error_kind::INVALID_PLUGIN,
            RpcError::HandlerFailure { .. } => error_kind::HANDLER_FAILURE,
            RpcError::HandlerPanic(_) => error_kind::HANDLER_PANIC,
            RpcError::PatternParse(_) => "PATTERN_PARSE",
            RpcError::ConfigLoadFailed(_) => "CONFIG_LOAD_FAILED",
            RpcError::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            RpcError::Io(_) => "IO",
            RpcError::Json(_) => "JSON",
            RpcError::Yaml(_) => "YAML",
            RpcError::InitFailed(_) => "INIT_FAILED",
            RpcError::Other(_) => "UNKNOWN",
        }
    }

    /// 获取 HTTP 风格状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RpcError::PatternNotFound(_) => status_code::NOT_FOUND,
            RpcError::NoSuchTransport(_) => status_code::NOT_FOUND,
            RpcError::PatternTimeout { .. } => status_code::TIMEOUT,
            RpcError::InvalidHeaders(_) => status_code::BAD_REQUEST,
            RpcError::PatternParse(_) => status_code::BAD_REQUEST,
            RpcError::DuplicatePattern(_) => status_code::CONFLICT,
            RpcError::DuplicateTransport(_) => status_code::CONFLICT,
            _ => status_code::INTERNAL_ERROR,
        }
    }
}
