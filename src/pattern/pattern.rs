//! 模式数据结构
//!
//! 模式既是注册键也是路由查询：从非空字符串键到值的映射。
//! 普通键参与匹配；以 `$` 开头的元键不参与匹配，在调度时被
//! 提取为头部字段。值可以是任意 JSON 值（按字符串形态比较），
//! 也可以是正则通配符（只约束键的存在，不会用于匹配消息体）。

use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 元键前缀
pub const META_SIGIL: char = '$';

/// 模式值
///
/// 带标签的值类型：字面值按字符串形态参与匹配，
/// 通配符只在模式的字符串序列化中出现。
#[derive(Debug, Clone)]
pub enum PatternValue {
    /// 字面值（按字符串形态比较）
    Value(Value),
    /// 正则通配符
    Wildcard(Regex),
}

impl PatternValue {
    /// 从字符串创建字面值
    pub fn text(s: impl Into<String>) -> Self {
        PatternValue::Value(Value::String(s.into()))
    }

    /// 匹配任意值的通配符（`/.*/`）
    pub fn any() -> Self {
        // ".*" 是合法正则
        PatternValue::Wildcard(Regex::new(".*").expect("静态正则"))
    }

    /// 是否为通配符
    pub fn is_wildcard(&self) -> bool {
        matches!(self, PatternValue::Wildcard(_))
    }

    /// 渲染为字符串形态
    ///
    /// 字面值渲染为其规范字符串（字符串值不带引号），
    /// 通配符渲染为 `/正则/` 字面量，与解析文法互逆。
    pub fn render(&self) -> String {
        match self {
            PatternValue::Value(v) => value_string(v),
            PatternValue::Wildcard(re) => format!("/{}/", re.as_str()),
        }
    }
}

impl PartialEq for PatternValue {
    fn eq(&self, other: &Self) -> bool {
        self.render() == other.render()
    }
}

impl From<Value> for PatternValue {
    fn from(v: Value) -> Self {
        PatternValue::Value(v)
    }
}

/// JSON 值的规范字符串形态
///
/// 字符串值原样返回，其余值按 JSON 文本渲染。
pub fn value_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 模式
///
/// 键有序的映射（字典序），保证美化输出和路由键的确定性。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    fields: BTreeMap<String, PatternValue>,
}

impl Pattern {
    /// 创建空模式
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// 判断键是否为元键
    pub fn is_meta_key(key: &str) -> bool {
        key.starts_with(META_SIGIL)
    }

    /// 插入一个键值对
    pub fn insert(&mut self, key: impl Into<String>, value: PatternValue) {
        self.fields.insert(key.into(), value);
    }

    /// 插入一个 JSON 字面值
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), PatternValue::Value(value));
    }

    /// 获取键对应的值
    pub fn get(&self, key: &str) -> Option<&PatternValue> {
        self.fields.get(key)
    }

    /// 移除键
    pub fn remove(&mut self, key: &str) -> Option<PatternValue> {
        self.fields.remove(key)
    }

    /// 是否包含键
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// 键值对数量
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 按键字典序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatternValue)> {
        self.fields.iter()
    }

    /// 非元键的数量（匹配深度）
    pub fn depth(&self) -> usize {
        self.fields
            .keys()
            .filter(|k| !Self::is_meta_key(k))
            .count()
    }

    /// 就地合并另一个模式，键冲突时后者覆盖
    pub fn merge(&mut self, other: Pattern) {
        for (k, v) in other.fields {
            self.fields.insert(k, v);
        }
    }

    /// 合并并返回新模式
    pub fn merged(mut self, other: Pattern) -> Self {
        self.merge(other);
        self
    }

    /// 匹配关系：本模式（注册模式）是否匹配查询
    ///
    /// 对本模式的每个非元键：字面值要求查询中存在该键且字符串
    /// 形态相等；通配符只要求键存在。元键被忽略；本模式中不存在
    /// 的键不构成约束。
    pub fn matches(&self, query: &Pattern) -> bool {
        for (key, value) in &self.fields {
            if Self::is_meta_key(key) {
                continue;
            }
            match (value, query.get(key)) {
                (_, None) => return false,
                (PatternValue::Wildcard(_), Some(_)) => {}
                (PatternValue::Value(v), Some(qv)) => {
                    if value_string(v) != qv.render() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// 非元键的规范字符串，用作索引查询缓存的键
    pub fn canonical_key(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            if Self::is_meta_key(key) {
                continue;
            }
            if !out.is_empty() {
                out.push('|');
            }
            out.push_str(key);
            out.push(':');
            out.push_str(&value.render());
        }
        out
    }

    /// 非元键投影为 JSON 对象（消息体）
    ///
    /// 通配符值渲染为其 `/正则/` 字符串形态。
    pub fn to_message(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.fields {
            if Self::is_meta_key(key) {
                continue;
            }
            let v = match value {
                PatternValue::Value(v) => v.clone(),
                PatternValue::Wildcard(_) => Value::String(value.render()),
            };
            map.insert(key.clone(), v);
        }
        Value::Object(map)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::pattern::parser::beautify(self))
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            match value {
                PatternValue::Value(v) => map.serialize_entry(key, v)?,
                PatternValue::Wildcard(_) => map.serialize_entry(key, &value.render())?,
            }
        }
        map.end()
    }
}
