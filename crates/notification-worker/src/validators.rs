//! 入口层的输入校验

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::NotificationError;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@[a-zA-Z0-9_]{5,}$").expect("用户名正则必须合法"));

const DANGEROUS_PATH_PATTERNS: [&str; 6] = ["../", "~/", "/etc/", "/root/", "/sys/", "/proc/"];

/// 接收方 ID：数字（可为负，群组/频道）或 `@username`
pub fn validate_recipient_id(id: &str) -> Result<(), NotificationError> {
    let digits = id.strip_prefix('-').unwrap_or(id);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    if USERNAME_RE.is_match(id) {
        return Ok(());
    }
    Err(NotificationError::InvalidRecipient(format!(
        "非法的接收方 ID: {id}"
    )))
}

/// 消息非空且不超过最大长度（按字符计）
pub fn validate_message(message: &str, max_length: usize) -> Result<(), NotificationError> {
    if message.trim().is_empty() {
        return Err(NotificationError::InvalidRequest(
            "消息内容不能为空".to_string(),
        ));
    }
    let len = message.chars().count();
    if len > max_length {
        return Err(NotificationError::InvalidRequest(format!(
            "消息过长 ({len} > {max_length} 字符)"
        )));
    }
    Ok(())
}

/// 拒绝空路径和指向敏感目录的路径
pub fn validate_file_path(path: &str) -> Result<(), NotificationError> {
    if path.trim().is_empty() {
        return Err(NotificationError::InvalidRequest(
            "文件路径不能为空".to_string(),
        ));
    }
    if DANGEROUS_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
        return Err(NotificationError::InvalidRequest(format!(
            "文件路径不安全: {path}"
        )));
    }
    Ok(())
}

/// Webhook 令牌校验
///
/// 先对双方取 SHA-256 摘要，再逐字节异或比较，耗时与令牌内容和长度无关。
pub fn validate_webhook_token(token: &str, expected: &str) -> bool {
    if token.is_empty() || expected.is_empty() {
        return false;
    }
    let a = Sha256::digest(token.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_id_formats() {
        assert!(validate_recipient_id("123456789").is_ok());
        assert!(validate_recipient_id("-1001234567890").is_ok());
        assert!(validate_recipient_id("@my_channel").is_ok());

        assert!(validate_recipient_id("@abc").is_err());
        assert!(validate_recipient_id("-").is_err());
        assert!(validate_recipient_id("12a3").is_err());
        assert!(validate_recipient_id("@bad-name").is_err());
    }

    #[test]
    fn test_message_length_counts_chars() {
        assert!(validate_message("hello", 5).is_ok());
        assert!(validate_message("hello!", 5).is_err());
        assert!(validate_message("   ", 10).is_err());
        // 多字节字符按字符计
        assert!(validate_message("通知服务", 4).is_ok());
    }

    #[test]
    fn test_file_path_rejects_sensitive_locations() {
        assert!(validate_file_path("/tmp/report.pdf").is_ok());
        assert!(validate_file_path("reports/weekly.csv").is_ok());

        for bad in ["", "../secret", "~/notes", "/etc/passwd", "/root/.ssh/id", "/proc/1/environ"] {
            assert!(validate_file_path(bad).is_err(), "{bad} 应被拒绝");
        }
    }

    #[test]
    fn test_webhook_token() {
        assert!(validate_webhook_token("s3cret", "s3cret"));
        assert!(!validate_webhook_token("s3cret", "s3cre"));
        assert!(!validate_webhook_token("S3cret", "s3cret"));
        assert!(!validate_webhook_token("", ""));
        assert!(!validate_webhook_token("x", ""));
    }
}
