//! CLI 命令定义

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// 通知命令行工具
///
/// 配置从 config/*.toml 与 NOTIFIER_ 前缀的环境变量加载，与服务端一致。
#[derive(Parser, Debug)]
#[command(name = "notify")]
#[command(version, about = "消息通知命令行工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 发送通知
    ///
    /// 未指定 --chat-id 时发往配置中的默认接收方。
    Send {
        /// 消息正文，发送文件时可省略
        #[arg(required_unless_present = "file")]
        message: Option<String>,

        /// 接收方 ID，可重复
        #[arg(short, long = "chat-id", allow_negative_numbers = true)]
        chat_ids: Vec<String>,

        /// 排版模式 (plain, markdown, html)
        #[arg(short, long)]
        parse_mode: Option<String>,

        /// 发送文件
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 文件说明
        #[arg(long, requires = "file")]
        caption: Option<String>,
    },

    /// 检查与消息平台的连通性
    Test,

    /// 打印本机 CPU、内存、磁盘使用率
    Metrics {
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 发送系统状态报告
    System {
        /// 接收方 ID，未指定时发往默认接收方
        #[arg(short, long, allow_negative_numbers = true)]
        chat_id: Option<String>,
    },

    /// 校验 cron 表达式并列出接下来的触发时间（UTC）
    ValidateCron {
        /// 五段式 cron 表达式
        expression: String,

        /// 列出的触发次数
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}
