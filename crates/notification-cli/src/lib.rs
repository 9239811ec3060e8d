//! 通知命令行工具
//!
//! 与服务端共用配置和投递链路，在进程内直接发送，不经过 HTTP API。

pub mod cli;
