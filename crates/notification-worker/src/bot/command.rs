//! 聊天命令解析

use crate::model::Category;

/// 机器人支持的聊天命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Status,
    System,
    /// 参数缺失或分类无法识别时为 None
    Subscribe(Option<Category>),
    Unsubscribe(Option<Category>),
    Subscriptions,
    Test,
    Unknown(String),
}

impl BotCommand {
    /// 解析一条消息；不以 `/` 开头的普通消息返回 None
    ///
    /// 群聊中的 `/cmd@bot_name` 形式会去掉 `@` 后缀，命令名不区分大小写。
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head
            .split_once('@')
            .map_or(head, |(name, _)| name)
            .to_ascii_lowercase();
        let argument = parts.next();

        let command = match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "status" => Self::Status,
            "system" => Self::System,
            "subscribe" => Self::Subscribe(argument.and_then(parse_category)),
            "unsubscribe" => Self::Unsubscribe(argument.and_then(parse_category)),
            "subscriptions" => Self::Subscriptions,
            "test" => Self::Test,
            _ => Self::Unknown(text.to_string()),
        };
        Some(command)
    }

    /// 指标标签
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Status => "status",
            Self::System => "system",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Subscriptions => "subscriptions",
            Self::Test => "test",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// 聊天中同时接受单复数写法，如 `errors`、`events`
fn parse_category(argument: &str) -> Option<Category> {
    let argument = argument.to_ascii_lowercase();
    argument
        .parse()
        .ok()
        .or_else(|| argument.strip_suffix('s')?.parse().ok())
}
