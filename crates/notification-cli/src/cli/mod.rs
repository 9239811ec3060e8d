//! CLI 模块
//!
//! 提供命令行接口，支持以下功能：
//!
//! - `send` - 发送文本或文件
//! - `test` - 检查与消息平台的连通性
//! - `metrics` - 打印本机系统指标
//! - `system` - 发送系统状态报告
//! - `validate-cron` - 校验 cron 表达式并列出接下来的触发时间
//!
//! # 使用示例
//!
//! ```bash
//! # 发往默认接收方
//! notify send "部署完成"
//!
//! # 指定多个接收方和排版模式
//! notify send "<b>构建失败</b>" --chat-id 12345 --chat-id -100200 --parse-mode html
//!
//! # 发送文件
//! notify send --file ./report.pdf --caption "周报" -c 12345
//!
//! # 查看 cron 表达式的触发时间
//! notify validate-cron "30 9 * * mon-fri" -n 3
//! ```
//!
//! HTTP 服务由 `notification-server` 提供。

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::{CommandRunner, next_fire_times, report_outcomes};
