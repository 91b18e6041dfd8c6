//! 十位 36 进制 ID 生成器
//!
//! 本模块实现调用关联 ID 的生成功能。
//! ID 格式：10 位小写 36 进制字符串（0-9, a-z）

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// 36 进制字符集（小写）
const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位小写 36 进制 ID
///
/// 使用时间戳 + 随机数组合，确保唯一性
///
/// # Returns
///
/// 返回 10 位小写字母数字字符串
///
/// # Example
///
/// ```
/// use fries_rpc::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();

    // 获取当前时间戳（毫秒）
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    // 生成随机数
    let random: u64 = rng.gen();

    // 组合时间戳和随机数
    let mut value = timestamp ^ random;

    // 转换为 36 进制
    let mut result = Vec::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        let index = (value % 36) as usize;
        result.push(BASE36_CHARS[index]);
        value /= 36;
        if value == 0 {
            // 高位熵耗尽后补充随机字符
            value = rng.gen();
        }
    }

    // 反转得到最终 ID
    result.reverse();
    String::from_utf8(result).unwrap_or_else(|_| "0".repeat(ID_LENGTH))
}

/// 验证 ID 格式是否有效
///
/// # Arguments
///
/// * `id` - 要验证的 ID 字符串
///
/// # Returns
///
/// 如果 ID 格式有效返回 `true`
///
/// # Example
///
/// ```
/// use fries_rpc::utils::id::is_valid_id;
///
/// assert!(is_valid_id("a1b2c3d4e5"));
/// assert!(!is_valid_id("invalid"));
/// ```
pub fn is_valid_id(id: &str) -> bool {
    // 检查长度
    if id.len() != ID_LENGTH {
        return false;
    }

    // 检查每个字符是否在小写 36 进制字符集中
    id.bytes()
        .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

/// 生成 UUID v4 格式的 ID
///
/// 用于事件 ID 等需要全局唯一性的场景
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
