//! 模式模块
//!
//! 包含模式匹配系统的核心组件：
//! - 模式数据结构（字面值与通配符）
//! - 字符串文法解析、组合拆分与美化渲染
//! - 子集匹配索引与匹配顺序

pub mod index;
pub mod parser;
pub mod pattern;

// 重导出常用类型
pub use index::{IndexEntry, LookupCacheStats, MatchOrder, PatternIndex};
pub use parser::{beautify, parse, split, IntoPattern};
pub use pattern::{value_string, Pattern, PatternValue, META_SIGIL};
