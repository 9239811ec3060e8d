//! Telegram Bot API 传输实现
//!
//! 使用 reqwest 直接调用 `sendMessage`、`getMe` 以及按附件类型选择的
//! `sendPhoto`、`sendVideo`、`sendDocument`，并通过 `getUpdates` 拉取聊天命令。
//! 平台响应按 HTTP 状态码分类：429 与 5xx 可重试，其余 4xx 不重试。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use notifier_shared::config::TelegramConfig;

use super::{Transport, TransportResult};
use crate::bot::{Update, UpdateSource};
use crate::error::NotificationError;
use crate::model::{FormatMode, RecipientId};

/// Bot API 通用响应体
#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// getUpdates 响应体
#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    description: Option<String>,
}

/// 长轮询请求在平台等待时间之外的额外超时
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Telegram 传输
pub struct TelegramTransport {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: String,
    max_message_length: usize,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            max_message_length: config.max_message_length,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base_url, self.bot_token, method)
    }

    async fn send(&self, request: reqwest::RequestBuilder, method: &str) -> TransportResult {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return classify_request_error(&err),
        };

        let status = response.status();
        let body = response.json::<ApiResponse>().await.unwrap_or_default();
        let result = classify_response(status, &body);

        if !result.is_success() {
            warn!(
                method,
                status = status.as_u16(),
                description = ?body.description,
                "Telegram API 调用失败"
            );
        }
        result
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn deliver_text(
        &self,
        recipient: &RecipientId,
        text: &str,
        format: FormatMode,
        timeout: Duration,
    ) -> TransportResult {
        let text = truncate_message(text, self.max_message_length);

        let mut payload = json!({
            "chat_id": recipient.as_str(),
            "text": text,
        });
        if let Some(parse_mode) = parse_mode(format) {
            payload["parse_mode"] = json!(parse_mode);
        }

        debug!(recipient = %recipient, len = text.len(), "发送 Telegram 文本消息");

        let request = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(timeout)
            .json(&payload);
        self.send(request, "sendMessage").await
    }

    async fn deliver_file(
        &self,
        recipient: &RecipientId,
        path: &Path,
        caption: Option<&str>,
        timeout: Duration,
    ) -> TransportResult {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return TransportResult::PermanentFailure(format!(
                    "读取附件失败: {}: {err}",
                    path.display()
                ));
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let kind = MediaKind::from_path(path);
        let mut form = Form::new()
            .text("chat_id", recipient.as_str().to_string())
            .part(kind.field(), Part::bytes(bytes).file_name(file_name));
        if let Some(caption) = caption {
            form = form.text(
                "caption",
                truncate_message(caption, CAPTION_MAX_LENGTH).into_owned(),
            );
        }

        debug!(
            recipient = %recipient,
            path = %path.display(),
            method = kind.method(),
            "发送 Telegram 文件"
        );

        let request = self
            .client
            .post(self.method_url(kind.method()))
            .timeout(timeout)
            .multipart(form);
        self.send(request, kind.method()).await
    }

    async fn check_connectivity(&self, timeout: Duration) -> bool {
        let request = self.client.get(self.method_url("getMe")).timeout(timeout);
        self.send(request, "getMe").await.is_success()
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[async_trait]
impl UpdateSource for TelegramTransport {
    async fn fetch_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, NotificationError> {
        let mut payload = json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }

        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(timeout + POLL_GRACE)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::UpdatePolling(format!("网络错误: {e}")))?;

        let status = response.status();
        let body = response
            .json::<UpdatesResponse>()
            .await
            .map_err(|e| NotificationError::UpdatePolling(format!("响应解析失败: {e}")))?;
        if !status.is_success() || !body.ok {
            return Err(NotificationError::UpdatePolling(
                body.description.unwrap_or_else(|| status.to_string()),
            ));
        }

        debug!(count = body.result.len(), ?offset, "拉取到聊天更新");
        Ok(body.result)
    }
}

/// 文件说明长度上限
const CAPTION_MAX_LENGTH: usize = 1024;

/// 附件类型，决定 Bot API 方法与 multipart 字段名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Photo,
    Video,
    Document,
}

impl MediaKind {
    /// 按扩展名（不区分大小写）判断，未知类型按文档发送
    fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("jpg" | "jpeg" | "png" | "gif" | "webp") => Self::Photo,
            Some("mp4" | "avi" | "mov" | "mkv" | "webm") => Self::Video,
            _ => Self::Document,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Video => "sendVideo",
            Self::Document => "sendDocument",
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// 排版模式对应的 parse_mode 参数
fn parse_mode(format: FormatMode) -> Option<&'static str> {
    match format {
        FormatMode::Plain => None,
        FormatMode::Markdown => Some("Markdown"),
        FormatMode::Html => Some("HTML"),
    }
}

/// 按字符截断超长消息，末尾追加 "..."
pub fn truncate_message(text: &str, max_len: usize) -> std::borrow::Cow<'_, str> {
    if text.chars().count() <= max_len {
        return std::borrow::Cow::Borrowed(text);
    }
    let keep = max_len.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    std::borrow::Cow::Owned(truncated)
}

fn classify_response(status: StatusCode, body: &ApiResponse) -> TransportResult {
    let description = body
        .description
        .clone()
        .unwrap_or_else(|| status.to_string());

    if status.is_success() && body.ok {
        return TransportResult::Success;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let reason = format!("平台限流: {description}");
        return match body.parameters.as_ref().and_then(|p| p.retry_after) {
            Some(secs) => TransportResult::Throttled {
                reason,
                retry_after: Duration::from_secs(secs),
            },
            None => TransportResult::TransientFailure(reason),
        };
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return TransportResult::TransientFailure(format!("平台服务异常: {description}"));
    }

    if status.is_client_error() {
        return TransportResult::PermanentFailure(description);
    }

    // 2xx 但 ok=false 视为请求被拒绝，其余非预期状态按瞬时处理
    if status.is_success() {
        TransportResult::PermanentFailure(description)
    } else {
        TransportResult::TransientFailure(description)
    }
}

fn classify_request_error(err: &reqwest::Error) -> TransportResult {
    if err.is_builder() {
        TransportResult::PermanentFailure(format!("请求构造失败: {err}"))
    } else if err.is_timeout() {
        TransportResult::TransientFailure(format!("请求超时: {err}"))
    } else {
        TransportResult::TransientFailure(format!("网络错误: {err}"))
    }
}
