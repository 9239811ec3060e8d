//! 消息排版
//!
//! 按排版模式生成告警、系统报告、周报等消息正文。
//! 时间戳统一为 UTC，由调用方传入以便测试固定输出。

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::model::FormatMode;
use crate::monitoring::SystemMetrics;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// 消息级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Info,
    Warning,
    Error,
    Success,
    Debug,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
            Self::Debug => "DEBUG",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Info => "ℹ️",
            Self::Warning => "⚠️",
            Self::Error => "❌",
            Self::Success => "✅",
            Self::Debug => "🔍",
        }
    }
}

/// 未知级别按 INFO 处理
impl From<&str> for Level {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "WARNING" | "WARN" => Self::Warning,
            "ERROR" => Self::Error,
            "SUCCESS" => Self::Success,
            "DEBUG" => Self::Debug,
            _ => Self::Info,
        }
    }
}

/// 转义 Markdown 标题中的控制字符
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '[' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn heading(title: &str, format: FormatMode) -> String {
    match format {
        FormatMode::Markdown => format!("*{}*", escape_markdown(title)),
        FormatMode::Html => format!("<b>{}</b>", escape_html(title)),
        FormatMode::Plain => title.to_string(),
    }
}

fn field(label: &str, value: &str, format: FormatMode) -> String {
    match format {
        FormatMode::Markdown => format!("*{label}:* {value}"),
        FormatMode::Html => format!("<b>{label}:</b> {value}"),
        FormatMode::Plain => format!("{label}: {value}"),
    }
}

fn timestamp_line(timestamp: DateTime<Utc>, format: FormatMode) -> String {
    let ts = timestamp.format(TIMESTAMP_FORMAT);
    match format {
        FormatMode::Plain => format!("Time: {ts}"),
        _ => format!("🕒 {ts}"),
    }
}

/// 标题 + 正文 + 时间戳
pub fn format_message(
    title: &str,
    body: &str,
    level: Level,
    format: FormatMode,
    timestamp: DateTime<Utc>,
) -> String {
    let head = match format {
        FormatMode::Plain => format!("[{}] {}", level.as_str(), title),
        _ => format!("{} {}", level.emoji(), heading(title, format)),
    };
    format!("{head}\n\n{body}\n\n{}", timestamp_line(timestamp, format))
}

/// 指标越过阈值的告警
pub fn format_alert(
    metric: &str,
    value: f64,
    threshold: f64,
    unit: &str,
    format: FormatMode,
    timestamp: DateTime<Utc>,
) -> String {
    let title = format!("Alert: {metric} Threshold Exceeded");
    let head = match format {
        FormatMode::Plain => title,
        _ => format!("🚨 {}", heading(&title, format)),
    };

    let mut out = head;
    out.push_str("\n\n");
    for (label, v) in [
        ("Current Value", value),
        ("Threshold", threshold),
        ("Exceeded By", value - threshold),
    ] {
        let _ = writeln!(out, "{}", field(label, &format!("{v:.1}{unit}"), format));
    }
    out.push('\n');
    out.push_str(&timestamp_line(timestamp, format));
    out
}

/// 系统状态报告
pub fn format_system_report(metrics: &SystemMetrics, format: FormatMode) -> String {
    let mut out = match format {
        FormatMode::Plain => "System Status".to_string(),
        _ => format!("🖥️ {}", heading("System Status", format)),
    };
    out.push_str("\n\n");

    let lines = [
        ("CPU Usage", format!("{:.1}%", metrics.cpu_percent)),
        (
            "Memory Usage",
            format!(
                "{:.1}% ({:.1}GB / {:.1}GB)",
                metrics.memory_percent,
                metrics.memory_used_bytes as f64 / GIB,
                metrics.memory_total_bytes as f64 / GIB
            ),
        ),
        (
            "Disk Usage",
            format!(
                "{:.1}% ({:.1}GB / {:.1}GB)",
                metrics.disk_percent,
                metrics.disk_used_bytes as f64 / GIB,
                metrics.disk_total_bytes as f64 / GIB
            ),
        ),
        (
            "Load Average",
            format!(
                "{:.2}, {:.2}, {:.2}",
                metrics.load_average[0], metrics.load_average[1], metrics.load_average[2]
            ),
        ),
    ];
    for (label, value) in lines {
        let _ = writeln!(out, "{}", field(label, &value, format));
    }
    out
}

/// 周报
pub fn format_weekly_summary(
    active_subscribers: usize,
    timestamp: DateTime<Utc>,
    format: FormatMode,
) -> String {
    let head = match format {
        FormatMode::Plain => "Weekly Summary".to_string(),
        _ => format!("📊 {}", heading("Weekly Summary", format)),
    };
    format!(
        "{head}\n\n\
         This week's highlights:\n\
         • System uptime: Good\n\
         • Notifications sent: Check logs\n\
         • Active subscribers: {active_subscribers}\n\n\
         Have a great week ahead! 🚀\n\n\
         {}",
        timestamp_line(timestamp, format)
    )
}
