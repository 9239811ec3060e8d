//! 应用状态

use std::sync::Arc;

use notification_worker::{
    FormatMode, NotificationError, Notifier, RecipientId, Scheduler, SystemMonitor,
    validators::validate_recipient_id,
};
use notifier_shared::config::AppConfig;

/// 入口层参数
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// 为空时不校验 API Key
    pub api_secret_key: Option<String>,
    /// 为空时 Webhook 一律拒绝
    pub webhook_secret: Option<String>,
    pub default_chat_ids: Vec<RecipientId>,
    pub default_format: FormatMode,
    pub max_message_length: usize,
    pub scheduler_enabled: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_secret_key: None,
            webhook_secret: None,
            default_chat_ids: Vec::new(),
            default_format: FormatMode::Markdown,
            max_message_length: 4096,
            scheduler_enabled: true,
        }
    }
}

impl ApiSettings {
    /// 默认接收方在启动时校验，非法配置直接拒绝启动
    pub fn from_config(config: &AppConfig) -> Result<Self, NotificationError> {
        let default_chat_ids = config
            .telegram
            .default_chat_ids
            .iter()
            .map(|id| {
                validate_recipient_id(id)?;
                RecipientId::new(id.as_str())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            api_secret_key: config.security.api_secret_key.clone().filter(|k| !k.is_empty()),
            webhook_secret: config.security.webhook_secret.clone().filter(|k| !k.is_empty()),
            default_chat_ids,
            default_format: config.telegram.default_format.parse()?,
            max_message_length: config.telegram.max_message_length,
            scheduler_enabled: config.scheduler.enabled,
        })
    }
}

/// Axum 共享状态
#[derive(Clone)]
pub struct AppState {
    pub notifier: Arc<Notifier>,
    pub scheduler: Arc<Scheduler>,
    /// 未启用系统监控时为 None
    pub monitor: Option<Arc<SystemMonitor>>,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    pub fn new(
        notifier: Arc<Notifier>,
        scheduler: Arc<Scheduler>,
        monitor: Option<Arc<SystemMonitor>>,
        settings: ApiSettings,
    ) -> Self {
        Self {
            notifier,
            scheduler,
            monitor,
            settings: Arc::new(settings),
        }
    }
}
