//! 通知领域模型
//!
//! 通知请求一经构造即不可变；订阅展开等步骤通过派生新请求完成，
//! 已提交的请求不会受到后续修改的影响。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, NotificationError};

// ---------------------------------------------------------------------------
// 格式与分类
// ---------------------------------------------------------------------------

/// 消息排版模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatMode {
    Plain,
    #[default]
    Markdown,
    Html,
}

impl FormatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Markdown => "markdown",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for FormatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatMode {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" | "none" => Ok(Self::Plain),
            "markdown" | "md" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            other => Err(NotificationError::InvalidRequest(format!(
                "未知的排版模式: {other}"
            ))),
        }
    }
}

/// 通知分类，用于按订阅展开接收方
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    System,
    Error,
    Event,
    Scheduled,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::System,
        Category::Error,
        Category::Event,
        Category::Scheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Error => "error",
            Self::Event => "event",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "error" => Ok(Self::Error),
            "event" => Ok(Self::Event),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(NotificationError::InvalidRequest(format!(
                "未知的通知分类: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// 接收方
// ---------------------------------------------------------------------------

/// 接收方标识（会话 / 频道 ID），保证非空
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientId(String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Result<Self, NotificationError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(NotificationError::InvalidRecipient(
                "接收方 ID 不能为空".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RecipientId {
    type Error = NotificationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecipientId> for String {
    fn from(value: RecipientId) -> Self {
        value.0
    }
}

impl FromStr for RecipientId {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// 通知请求
// ---------------------------------------------------------------------------

/// 文件附件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub path: PathBuf,
    pub caption: Option<String>,
}

impl Attachment {
    pub fn new(path: impl Into<PathBuf>, caption: Option<String>) -> Self {
        Self {
            path: path.into(),
            caption,
        }
    }
}

/// 通知请求
///
/// 只能通过 [`NotificationRequest::builder`] 构造。接收方列表按首次出现去重；
/// 未显式指定接收方时必须带分类，由订阅注册表在提交时展开。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRequest {
    body: String,
    format: FormatMode,
    recipients: Vec<RecipientId>,
    attachment: Option<Attachment>,
    category: Option<Category>,
}

impl NotificationRequest {
    pub fn builder(body: impl Into<String>) -> NotificationRequestBuilder {
        NotificationRequestBuilder {
            body: body.into(),
            format: FormatMode::default(),
            recipients: Vec::new(),
            attachment: None,
            category: None,
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn format(&self) -> FormatMode {
        self.format
    }

    pub fn recipients(&self) -> &[RecipientId] {
        &self.recipients
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    /// 是否需要按分类展开接收方
    pub fn needs_expansion(&self) -> bool {
        self.recipients.is_empty()
    }

    /// 派生一个替换接收方列表的新请求
    pub fn with_recipients(&self, recipients: impl IntoIterator<Item = RecipientId>) -> Self {
        Self {
            recipients: dedup(recipients),
            ..self.clone()
        }
    }

    /// 派生一个替换正文的新请求（定时任务在触发时渲染正文）
    pub fn with_body(&self, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..self.clone()
        }
    }
}

/// 通知请求构造器
#[derive(Debug, Clone)]
pub struct NotificationRequestBuilder {
    body: String,
    format: FormatMode,
    recipients: Vec<RecipientId>,
    attachment: Option<Attachment>,
    category: Option<Category>,
}

impl NotificationRequestBuilder {
    pub fn format(mut self, format: FormatMode) -> Self {
        self.format = format;
        self
    }

    pub fn recipient(mut self, recipient: RecipientId) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn recipients(mut self, recipients: impl IntoIterator<Item = RecipientId>) -> Self {
        self.recipients.extend(recipients);
        self
    }

    pub fn attachment(mut self, path: impl AsRef<Path>, caption: Option<String>) -> Self {
        self.attachment = Some(Attachment::new(path.as_ref(), caption));
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn maybe_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    pub fn build(self) -> Result<NotificationRequest, NotificationError> {
        if self.body.trim().is_empty() && self.attachment.is_none() {
            return Err(NotificationError::InvalidRequest(
                "消息正文与附件不能同时为空".to_string(),
            ));
        }
        if self.recipients.is_empty() && self.category.is_none() {
            return Err(NotificationError::InvalidRequest(
                "未指定接收方时必须提供通知分类".to_string(),
            ));
        }

        Ok(NotificationRequest {
            body: self.body,
            format: self.format,
            recipients: dedup(self.recipients),
            attachment: self.attachment,
            category: self.category,
        })
    }
}

fn dedup(recipients: impl IntoIterator<Item = RecipientId>) -> Vec<RecipientId> {
    let mut seen = std::collections::HashSet::new();
    recipients
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// 投递结果
// ---------------------------------------------------------------------------

/// 单个接收方的投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub recipient: RecipientId,
    pub succeeded: bool,
    /// 传输层实际调用次数（限流放弃时可能为 0）
    pub attempts: u32,
    pub last_error: Option<DeliveryError>,
}

impl DeliveryOutcome {
    pub fn success(recipient: RecipientId, attempts: u32) -> Self {
        Self {
            recipient,
            succeeded: true,
            attempts,
            last_error: None,
        }
    }

    pub fn failure(recipient: RecipientId, attempts: u32, error: DeliveryError) -> Self {
        Self {
            recipient,
            succeeded: false,
            attempts,
            last_error: Some(error),
        }
    }
}
