//! 模式索引
//!
//! 存储 (模式 → 载荷) 对，在可配置的匹配顺序下回答子集查询。
//! 包含 LRU 查询缓存，提升高频查询的命中性能。

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::pattern::Pattern;

// ============================================================================
// 匹配顺序
// ============================================================================

/// 匹配顺序
///
/// 当多个注册模式同时匹配一个查询时的决胜策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOrder {
    /// 返回最早插入的匹配
    Insertion,
    /// 返回非元键最多的匹配，数量相同时最早插入者优先（默认）
    #[default]
    Depth,
}

impl std::str::FromStr for MatchOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insertion" => Ok(MatchOrder::Insertion),
            "depth" => Ok(MatchOrder::Depth),
            other => Err(format!("未知匹配顺序: '{}'", other)),
        }
    }
}

// ============================================================================
// 查询缓存
// ============================================================================

/// 默认缓存容量
const DEFAULT_CACHE_CAPACITY: usize = 256;

/// 查询缓存统计信息
#[derive(Debug, Clone, Serialize)]
pub struct LookupCacheStats {
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 缓存条目数量
    pub size: usize,
    /// 缓存容量
    pub capacity: usize,
    /// 命中率（百分比）
    pub hit_rate: f64,
}

/// 查询缓存
///
/// 以查询模式的规范字符串为键缓存命中结果。子集匹配下无法做
/// 精确失效，任何写入都会整体清空。
struct LookupCache<P> {
    cache: Mutex<LruCache<String, (Pattern, P)>>,
    hits: AtomicU64,
    misses: AtomicU64,
    capacity: usize,
}

impl<P: Clone> LookupCache<P> {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("容量至少为 1"),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<(Pattern, P)> {
        let mut cache = self.cache.lock().expect("缓存锁中毒");
        if let Some(hit) = cache.get(key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(hit)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    fn put(&self, key: String, value: (Pattern, P)) {
        let mut cache = self.cache.lock().expect("缓存锁中毒");
        cache.put(key, value);
    }

    fn clear(&self) {
        let mut cache = self.cache.lock().expect("缓存锁中毒");
        cache.clear();
    }

    fn stats(&self) -> LookupCacheStats {
        let cache = self.cache.lock().expect("缓存锁中毒");
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        LookupCacheStats {
            hits,
            misses,
            size: cache.len(),
            capacity: self.capacity,
            hit_rate: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}

// ============================================================================
// 模式索引
// ============================================================================

/// 索引条目
#[derive(Debug, Clone)]
pub struct IndexEntry<P> {
    /// 注册模式
    pub pattern: Pattern,
    /// 关联载荷
    pub payload: P,
    /// 插入序号
    seq: u64,
}

impl<P> IndexEntry<P> {
    /// 插入序号
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// 模式索引
///
/// 条目按插入顺序保存；`lookup` 是索引内容和匹配顺序的纯函数。
/// 本类型不做内部加锁（缓存除外），持有者负责并发保护。
pub struct PatternIndex<P: Clone> {
    entries: Vec<IndexEntry<P>>,
    next_seq: u64,
    order: MatchOrder,
    cache: Option<LookupCache<P>>,
}

impl<P: Clone> PatternIndex<P> {
    /// 创建索引（带默认容量的查询缓存）
    pub fn new(order: MatchOrder) -> Self {
        Self::with_cache_capacity(order, DEFAULT_CACHE_CAPACITY)
    }

    /// 创建指定缓存容量的索引
    pub fn with_cache_capacity(order: MatchOrder, capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
            order,
            cache: Some(LookupCache::new(capacity)),
        }
    }

    /// 创建无缓存的索引
    pub fn without_cache(order: MatchOrder) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
            order,
            cache: None,
        }
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 插入一个条目
    pub fn add(&mut self, pattern: Pattern, payload: P) {
        self.entries.push(IndexEntry {
            pattern,
            payload,
            seq: self.next_seq,
        });
        self.next_seq += 1;

        if let Some(ref cache) = self.cache {
            cache.clear();
        }
    }

    /// 删除第一个与参数精确相等的条目
    ///
    /// 幂等：不存在的条目不是错误。返回是否删除了条目。
    pub fn remove(&mut self, pattern: &Pattern) -> bool {
        let position = self.entries.iter().position(|e| &e.pattern == pattern);
        match position {
            Some(idx) => {
                self.entries.remove(idx);
                if let Some(ref cache) = self.cache {
                    cache.clear();
                }
                true
            }
            None => false,
        }
    }

    /// 精确相等探测（forbid_same_route_names 用）
    pub fn find_exact(&self, pattern: &Pattern) -> Option<&IndexEntry<P>> {
        self.entries.iter().find(|e| &e.pattern == pattern)
    }

    /// 查找最佳匹配
    ///
    /// 无匹配时返回 `None` 而非报错；调用方负责转换为错误。
    pub fn lookup(&self, query: &Pattern) -> Option<(Pattern, P)> {
        let cache_key = query.canonical_key();
        if let Some(ref cache) = self.cache {
            if let Some(hit) = cache.get(&cache_key) {
                return Some(hit);
            }
        }

        let found = self.lookup_uncached(query);

        if let Some(ref result) = found {
            if let Some(ref cache) = self.cache {
                cache.put(cache_key, result.clone());
            }
        }

        found
    }

    /// 不经缓存的查找
    fn lookup_uncached(&self, query: &Pattern) -> Option<(Pattern, P)> {
        let mut best: Option<&IndexEntry<P>> = None;

        // entries 保持插入顺序，先见者即先插入者
        for entry in &self.entries {
            if !entry.pattern.matches(query) {
                continue;
            }
            match self.order {
                MatchOrder::Insertion => {
                    return Some((entry.pattern.clone(), entry.payload.clone()));
                }
                MatchOrder::Depth => match best {
                    // 仅严格更深时替换，深度相同保留更早插入者
                    Some(b) if entry.pattern.depth() <= b.pattern.depth() => {}
                    _ => best = Some(entry),
                },
            }
        }

        best.map(|e| (e.pattern.clone(), e.payload.clone()))
    }

    /// 查询缓存统计（未启用缓存时返回 `None`）
    pub fn cache_stats(&self) -> Option<LookupCacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }
}
