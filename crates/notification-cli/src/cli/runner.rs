//! 命令执行器
//!
//! 在进程内组装投递链路，执行各子命令并把结果打印到终端。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use notification_worker::formatters::format_system_report;
use notification_worker::scheduler::CronExpr;
use notification_worker::transport::TelegramTransport;
use notification_worker::validators::{validate_file_path, validate_message, validate_recipient_id};
use notification_worker::{
    DeliveryEngine, DeliveryOutcome, DeliverySettings, FormatMode, MetricsSampler,
    NotificationRequest, Notifier, RateLimiter, RecipientId, SubscriptionRegistry, SysinfoSampler,
    Transport, sample_blocking,
};
use notifier_shared::config::AppConfig;

/// 命令执行器
pub struct CommandRunner {
    config: AppConfig,
    notifier: Arc<Notifier>,
    sampler: Arc<dyn MetricsSampler>,
}

impl CommandRunner {
    /// 使用 Telegram 传输与本机指标采集
    pub fn new(config: AppConfig) -> Self {
        let transport = Arc::new(TelegramTransport::new(&config.telegram));
        Self::with_components(config, transport, Arc::new(SysinfoSampler::new()))
    }

    pub fn with_components(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        sampler: Arc<dyn MetricsSampler>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.delivery.rate_limit_capacity,
            config.delivery.rate_limit_refill_per_sec,
        ));
        let engine = Arc::new(DeliveryEngine::new(
            transport,
            limiter,
            DeliverySettings::from_config(&config.delivery),
        ));
        let notifier = Arc::new(Notifier::new(engine, Arc::new(SubscriptionRegistry::new())));
        Self {
            config,
            notifier,
            sampler,
        }
    }

    /// 执行 send 命令
    ///
    /// 带文件时正文作为说明的后备。
    pub async fn run_send(
        &self,
        message: Option<String>,
        chat_ids: &[String],
        parse_mode: Option<&str>,
        file: Option<PathBuf>,
        caption: Option<String>,
    ) -> Result<Vec<DeliveryOutcome>> {
        let recipients = self.recipients(chat_ids)?;
        let format: FormatMode = parse_mode
            .unwrap_or(self.config.telegram.default_format.as_str())
            .parse()?;

        let builder = match file {
            Some(path) => {
                validate_file_path(&path.to_string_lossy())?;
                if !path.is_file() {
                    bail!("文件不存在: {}", path.display());
                }
                let caption = caption.or(message);
                NotificationRequest::builder("").attachment(&path, caption)
            }
            None => {
                let message = message.unwrap_or_default();
                validate_message(&message, self.config.telegram.max_message_length)?;
                NotificationRequest::builder(message)
            }
        };
        let request = builder.format(format).recipients(recipients).build()?;

        info!(recipients = request.recipients().len(), format = %format, "发送通知");
        Ok(self.notifier.deliver(request).await?)
    }

    /// 执行 test 命令
    pub async fn run_test(&self) -> Result<()> {
        let engine = self.notifier.engine();
        let transport = engine.transport();
        if transport
            .check_connectivity(engine.settings().transport_timeout)
            .await
        {
            println!("✅ {} 连接正常", transport.name());
            Ok(())
        } else {
            bail!("{} 连接失败，请检查 bot_token 与网络", transport.name())
        }
    }

    /// 执行 metrics 命令
    pub async fn run_metrics(&self, json: bool) -> Result<()> {
        let metrics = sample_blocking(self.sampler.clone()).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        } else {
            println!("{}", format_system_report(&metrics, FormatMode::Plain));
        }
        Ok(())
    }

    /// 执行 system 命令
    pub async fn run_system(&self, chat_id: Option<String>) -> Result<Vec<DeliveryOutcome>> {
        let recipients = self.recipients(chat_id.as_slice())?;
        let metrics = sample_blocking(self.sampler.clone()).await?;
        let request = NotificationRequest::builder(format_system_report(
            &metrics,
            FormatMode::Markdown,
        ))
        .format(FormatMode::Markdown)
        .recipients(recipients)
        .build()?;
        Ok(self.notifier.deliver(request).await?)
    }

    /// 校验接收方；未指定时使用配置中的默认接收方
    fn recipients(&self, chat_ids: &[String]) -> Result<Vec<RecipientId>> {
        let ids = if chat_ids.is_empty() {
            &self.config.telegram.default_chat_ids
        } else {
            chat_ids
        };
        if ids.is_empty() {
            bail!("未指定 --chat-id，且未配置 telegram.default_chat_ids");
        }

        ids.iter()
            .map(|id| -> Result<RecipientId> {
                let id = id.trim();
                validate_recipient_id(id).with_context(|| format!("接收方 ID 无效: {id}"))?;
                Ok(RecipientId::new(id)?)
            })
            .collect()
    }
}

/// 打印各接收方结果，存在失败时返回错误
pub fn report_outcomes(outcomes: &[DeliveryOutcome]) -> Result<()> {
    for outcome in outcomes {
        match &outcome.last_error {
            None => println!("✅ {} (尝试 {} 次)", outcome.recipient, outcome.attempts),
            Some(err) => println!(
                "❌ {} (尝试 {} 次): {}",
                outcome.recipient, outcome.attempts, err
            ),
        }
    }

    let failed = outcomes.iter().filter(|o| !o.succeeded).count();
    if failed > 0 {
        warn!(failed, total = outcomes.len(), "部分接收方投递失败");
        bail!("{failed}/{} 个接收方投递失败", outcomes.len());
    }
    Ok(())
}

/// 从 `from` 之后依次计算 cron 表达式的触发时间
pub fn next_fire_times(
    expression: &str,
    from: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    let cron = CronExpr::parse(expression)?;
    let mut times = Vec::with_capacity(count);
    let mut cursor = from;
    while times.len() < count {
        let Some(next) = cron.next_after(&cursor) else {
            break;
        };
        times.push(next);
        cursor = next;
    }
    Ok(times)
}
