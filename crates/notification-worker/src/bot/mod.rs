//! 聊天命令
//!
//! 通过 getUpdates 长轮询接收 `/subscribe`、`/status` 等命令，
//! 订阅变更直接作用于订阅注册表，回复经投递链路发回原会话。

mod command;
mod handler;
mod poller;

pub use command::BotCommand;
pub use handler::CommandHandler;
pub use poller::{Chat, CommandLoop, IncomingMessage, Update, UpdateSource};
