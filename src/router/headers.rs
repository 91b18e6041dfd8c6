//! 头部规范化
//!
//! 把三个来源（框架默认、调用方元标志、调度时注入）合并成一条
//! 经过校验的规范头部记录。元键在拆分阶段已去掉 `$` 前缀，规范
//! 化之后只存在去前缀形态。

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::pattern::Pattern;
use crate::utils::id::generate_id;
use crate::utils::{Result, RpcError};

/// 本进程发射器在 notify 列表中的保留名
pub const LOCAL_EMITTER: &str = "local";

/// 规范头部记录
///
/// 每次调用构建一条；处理器通过独占引用读写（`break` 字段由
/// 处理器设置以短路链式调用）。
#[derive(Debug, Clone, Default, Serialize)]
pub struct Headers {
    /// 关联 ID（缺失时自动生成）
    pub id: String,

    /// 本次调用的超时（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// 慢调用告警阈值（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow: Option<u64>,

    /// 只查本地索引
    pub local: bool,

    /// 本地处理器即发即忘
    pub nowait: bool,

    /// 要扇出的订阅传输器名单
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<Vec<String>>,

    /// 在结果上附加调试追踪
    pub debug: bool,

    /// 处理器可设置的链式短路标志
    #[serde(rename = "break")]
    pub break_chain: bool,

    /// 命中的注册模式
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,

    /// 原始请求消息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,

    /// 未识别的扩展元数据
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl Headers {
    /// 规范化头部
    ///
    /// # Arguments
    ///
    /// * `add_headers` - 框架默认头部（JSON 对象）
    /// * `act_meta` - 调用方元标志（已去 `$` 前缀）
    /// * `source_message` - 原始请求消息
    /// * `matched` - 命中的注册模式
    ///
    /// # Errors
    ///
    /// 任何字段不符合头部模式时返回 `RpcError::InvalidHeaders`。
    pub fn normalize(
        add_headers: &Value,
        act_meta: BTreeMap<String, Value>,
        source_message: &Value,
        matched: &Pattern,
    ) -> Result<Headers> {
        // 右偏合并: 默认 <- 调用方
        let mut merged = match add_headers {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(RpcError::InvalidHeaders(format!(
                    "默认头部必须是对象, 得到: {}",
                    other
                )))
            }
        };
        for (key, value) in act_meta {
            deep_merge_entry(&mut merged, key, value);
        }

        let mut headers = Headers::default();

        for (key, value) in merged {
            match key.as_str() {
                "id" => headers.id = coerce_string(&key, value)?,
                "timeout" => headers.timeout = Some(coerce_millis(&key, value)?),
                "slow" => headers.slow = Some(coerce_millis(&key, value)?),
                "local" => headers.local = coerce_bool(&key, value)?,
                "nowait" => headers.nowait = coerce_bool(&key, value)?,
                "debug" => headers.debug = coerce_bool(&key, value)?,
                "break" => headers.break_chain = coerce_bool(&key, value)?,
                "notify" => headers.notify = coerce_notify(value)?,
                // 调度时注入的字段不允许由调用方伪造
                "pattern" | "source" => {}
                _ => {
                    headers.extra.insert(key, value);
                }
            }
        }

        if headers.id.is_empty() {
            headers.id = generate_id();
        }

        headers.pattern = Some(matched.clone());
        headers.source = Some(source_message.clone());

        headers.validate()?;
        Ok(headers)
    }

    /// 校验规范化之后的不变量
    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(RpcError::InvalidHeaders("id 不能为空".to_string()));
        }

        if let Some(ref notify) = self.notify {
            if notify.is_empty() {
                return Err(RpcError::InvalidHeaders(
                    "notify 列表不能为空".to_string(),
                ));
            }
            let mut seen = HashSet::new();
            for name in notify {
                if name.is_empty() {
                    return Err(RpcError::InvalidHeaders(
                        "notify 名称不能为空".to_string(),
                    ));
                }
                if !seen.insert(name) {
                    return Err(RpcError::InvalidHeaders(format!(
                        "notify 名称重复: '{}'",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// 单键的右偏深合并：两侧都是对象时递归合并，否则后者覆盖
fn deep_merge_entry(target: &mut Map<String, Value>, key: String, value: Value) {
    match (target.get_mut(&key), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            for (k, v) in incoming {
                deep_merge_entry(existing, k, v);
            }
        }
        (_, value) => {
            target.insert(key, value);
        }
    }
}

fn coerce_string(key: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(RpcError::InvalidHeaders(format!(
            "'{}' 必须是字符串, 得到: {}",
            key, other
        ))),
    }
}

/// 毫秒数：接受数字和数字字符串（字符串文法产生的形态）
fn coerce_millis(key: &str, value: Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| RpcError::InvalidHeaders(format!("'{}' 必须是非负整数", key))),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| RpcError::InvalidHeaders(format!("'{}' 不是合法毫秒数: '{}'", key, s))),
        other => Err(RpcError::InvalidHeaders(format!(
            "'{}' 必须是毫秒数, 得到: {}",
            key, other
        ))),
    }
}

/// 布尔：接受布尔值和 "true"/"false" 字符串
fn coerce_bool(key: &str, value: Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::String(s) => match s.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(RpcError::InvalidHeaders(format!(
                "'{}' 不是合法布尔值: '{}'",
                key, other
            ))),
        },
        other => Err(RpcError::InvalidHeaders(format!(
            "'{}' 必须是布尔值, 得到: {}",
            key, other
        ))),
    }
}

/// notify 强制转换
///
/// | 输入 | 结果 |
/// |------|------|
/// | `true` / `"true"` / 正则形态 | `["local"]` |
/// | 逗号分隔字符串 | 去空白的非空段 |
/// | 列表 | 原样 |
fn coerce_notify(value: Value) -> Result<Option<Vec<String>>> {
    match value {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::Bool(true) => Ok(Some(vec![LOCAL_EMITTER.to_string()])),
        Value::String(s) => {
            let trimmed = s.trim();
            // 通配符元值在拆分阶段渲染成 /正则/ 形态
            if trimmed == "true"
                || (trimmed.len() >= 2 && trimmed.starts_with('/') && trimmed.ends_with('/'))
            {
                return Ok(Some(vec![LOCAL_EMITTER.to_string()]));
            }
            let names: Vec<String> = trimmed
                .split(',')
                .map(|seg| seg.trim())
                .filter(|seg| !seg.is_empty())
                .map(|seg| seg.to_string())
                .collect();
            Ok(Some(names))
        }
        Value::Array(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => names.push(s),
                    other => {
                        return Err(RpcError::InvalidHeaders(format!(
                            "notify 列表元素必须是字符串, 得到: {}",
                            other
                        )))
                    }
                }
            }
            Ok(Some(names))
        }
        other => Err(RpcError::InvalidHeaders(format!(
            "notify 不支持的形态: {}",
            other
        ))),
    }
}
