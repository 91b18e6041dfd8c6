//! 核心模块
//!
//! 包含实例配置和错误分类器。

pub mod config;

pub use config::{
    error_kind_of, Classifier, ClassifierFn, ErrorDisposition, RpcConfig, RpcConfigBuilder,
};
