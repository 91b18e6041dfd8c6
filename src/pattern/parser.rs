//! 模式解析与拆分
//!
//! 实现模式的字符串文法、组合模式的消息/元数据拆分，以及用于
//! 诊断输出的美化渲染。
//!
//! # 文法
//!
//! ```text
//! pattern := segment ("," segment)*
//! segment := key [":" value]
//! ```
//!
//! 省略值表示通配符 `/.*/`；首尾为 `/` 的值是去掉斜杠后的正则
//! 字面量；其余值保持为字符串。键和值两侧的空白会被去除。

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::pattern::{Pattern, PatternValue};
use crate::utils::{Result, RpcError};

/// 可转换为模式的输入
///
/// 接受已构建的模式、符合文法的字符串，以及 JSON 对象。
pub trait IntoPattern {
    /// 执行转换
    fn into_pattern(self) -> Result<Pattern>;
}

impl IntoPattern for Pattern {
    fn into_pattern(self) -> Result<Pattern> {
        Ok(self)
    }
}

impl IntoPattern for &Pattern {
    fn into_pattern(self) -> Result<Pattern> {
        Ok(self.clone())
    }
}

impl IntoPattern for &str {
    fn into_pattern(self) -> Result<Pattern> {
        parse(self)
    }
}

impl IntoPattern for String {
    fn into_pattern(self) -> Result<Pattern> {
        parse(&self)
    }
}

impl IntoPattern for Value {
    fn into_pattern(self) -> Result<Pattern> {
        match self {
            Value::Object(map) => map.into_pattern(),
            other => Err(RpcError::PatternParse(format!(
                "模式必须是对象或字符串, 得到: {}",
                other
            ))),
        }
    }
}

impl IntoPattern for Map<String, Value> {
    fn into_pattern(self) -> Result<Pattern> {
        let mut pattern = Pattern::new();
        for (key, value) in self {
            if key.is_empty() {
                return Err(RpcError::PatternParse("模式键不能为空".to_string()));
            }
            pattern.set(key, value);
        }
        Ok(pattern)
    }
}

/// 解析字符串形态的模式
///
/// # Example
///
/// ```
/// use fries_rpc::pattern::parse;
///
/// let p = parse("role:math, cmd:sum").unwrap();
/// assert_eq!(p.depth(), 2);
/// ```
pub fn parse(input: &str) -> Result<Pattern> {
    let mut pattern = Pattern::new();

    for segment in input.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let (key, value) = match segment.split_once(':') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (segment, None),
        };

        if key.is_empty() {
            return Err(RpcError::PatternParse(format!(
                "模式键不能为空: '{}'",
                segment
            )));
        }

        let value = match value {
            // 省略值等价于通配符 /.*/
            None => PatternValue::any(),
            Some(raw) if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') => {
                let source = &raw[1..raw.len() - 1];
                let regex = regex::Regex::new(source).map_err(|e| {
                    RpcError::PatternParse(format!("非法正则 '{}': {}", source, e))
                })?;
                PatternValue::Wildcard(regex)
            }
            Some(raw) => PatternValue::text(raw),
        };

        pattern.insert(key, value);
    }

    Ok(pattern)
}

/// 拆分组合模式
///
/// 从左到右合并多个部分模式（键冲突时后者覆盖），返回三元组：
///
/// - `message`: 非元键投影成的 JSON 对象
/// - `meta`: 去掉 `$` 前缀后的元键映射
/// - `raw`: 包含全部键（含元键）的合并模式
pub fn split(parts: Vec<Pattern>) -> (Value, BTreeMap<String, Value>, Pattern) {
    let mut raw = Pattern::new();
    for part in parts {
        raw.merge(part);
    }

    let message = raw.to_message();

    let mut meta = BTreeMap::new();
    for (key, value) in raw.iter() {
        if let Some(stripped) = key.strip_prefix('$') {
            let v = match value {
                PatternValue::Value(v) => v.clone(),
                PatternValue::Wildcard(_) => Value::String(value.render()),
            };
            meta.insert(stripped.to_string(), v);
        }
    }

    (message, meta, raw)
}

/// 美化渲染模式，用于日志和错误消息
///
/// 输出 `k1:v1, k2:v2` 形式；嵌套对象渲染为 `k:{inner1,inner2}`。
pub fn beautify(pattern: &Pattern) -> String {
    let mut segments = Vec::with_capacity(pattern.len());
    for (key, value) in pattern.iter() {
        let rendered = match value {
            PatternValue::Value(Value::Object(map)) => {
                let inner: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
                format!("{{{}}}", inner.join(","))
            }
            other => other.render(),
        };
        segments.push(format!("{}:{}", key, rendered));
    }
    segments.join(", ")
}
