//! API 模块
//!
//! 对外提供的 SDK 接口。
//!
//! - `sdk`: RpcCore 主接口，提供框架所有功能的访问入口

pub mod sdk;

// 重导出主要类型
pub use sdk::RpcCore;
