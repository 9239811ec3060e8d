//! 通知服务门面
//!
//! 各入口（HTTP、Webhook、CLI、定时任务、系统监控）统一经 `Notifier::submit`
//! 提交请求：在提交时刻按分类展开接收方快照，然后在后台任务中投递。

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::DeliveryEngine;
use crate::error::NotificationError;
use crate::formatters::{format_system_report, format_weekly_summary};
use crate::model::{DeliveryOutcome, NotificationRequest, RecipientId};
use crate::monitoring::{MetricsSampler, sample_blocking};
use crate::registry::SubscriptionRegistry;
use crate::scheduler::{JobContent, JobDispatcher, JobPayload};

/// 已提交投递的句柄
#[derive(Debug)]
pub struct DeliveryHandle {
    id: Uuid,
    recipients: Vec<RecipientId>,
    task: JoinHandle<Vec<DeliveryOutcome>>,
}

impl DeliveryHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 提交时刻解析出的接收方
    pub fn recipients(&self) -> &[RecipientId] {
        &self.recipients
    }

    /// 等待全部接收方的投递结果，顺序与 `recipients()` 一致
    pub async fn wait(self) -> Result<Vec<DeliveryOutcome>, NotificationError> {
        self.task
            .await
            .map_err(|e| NotificationError::DeliveryTask(e.to_string()))
    }
}

/// 通知服务
pub struct Notifier {
    engine: Arc<DeliveryEngine>,
    registry: Arc<SubscriptionRegistry>,
}

impl Notifier {
    pub fn new(engine: Arc<DeliveryEngine>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { engine, registry }
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// 解析接收方：显式接收方优先，否则取分类订阅者的当前快照
    pub fn resolve(&self, request: &NotificationRequest) -> NotificationRequest {
        match request.category() {
            Some(category) if request.needs_expansion() => {
                request.with_recipients(self.registry.recipients_for(category))
            }
            _ => request.clone(),
        }
    }

    /// 提交请求，立即返回句柄，投递在后台进行
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn submit(&self, request: NotificationRequest) -> DeliveryHandle {
        let resolved = self.resolve(&request);
        let id = Uuid::now_v7();
        let recipients = resolved.recipients().to_vec();

        if recipients.is_empty() {
            warn!(
                delivery_id = %id,
                category = ?resolved.category(),
                "分类下没有订阅者，无需投递"
            );
        } else {
            info!(
                delivery_id = %id,
                recipients = recipients.len(),
                category = ?resolved.category(),
                format = %resolved.format(),
                "通知已提交"
            );
        }

        let engine = self.engine.clone();
        let task = tokio::spawn(async move { engine.deliver(&resolved).await });

        DeliveryHandle {
            id,
            recipients,
            task,
        }
    }

    /// 提交并等待结果
    pub async fn deliver(
        &self,
        request: NotificationRequest,
    ) -> Result<Vec<DeliveryOutcome>, NotificationError> {
        self.submit(request).wait().await
    }
}

/// 定时任务分发器：在触发时渲染正文并提交投递
///
/// 渲染与投递都在独立任务中进行，调度循环不会被采样或投递阻塞。
pub struct NotificationDispatcher {
    notifier: Arc<Notifier>,
    sampler: Option<Arc<dyn MetricsSampler>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<Notifier>, sampler: Option<Arc<dyn MetricsSampler>>) -> Self {
        Self { notifier, sampler }
    }

    async fn render(
        notifier: &Notifier,
        sampler: Option<Arc<dyn MetricsSampler>>,
        payload: &JobPayload,
    ) -> Result<NotificationRequest, NotificationError> {
        let request = &payload.request;
        match payload.content {
            JobContent::Static => Ok(request.clone()),
            JobContent::SystemReport => {
                let sampler = sampler.ok_or_else(|| {
                    NotificationError::MetricsUnavailable("未配置系统指标采集器".to_string())
                })?;
                let metrics = sample_blocking(sampler).await?;
                Ok(request.with_body(format_system_report(&metrics, request.format())))
            }
            JobContent::WeeklySummary => {
                let subscribers = notifier.resolve(request).recipients().len();
                Ok(request.with_body(format_weekly_summary(
                    subscribers,
                    Utc::now(),
                    request.format(),
                )))
            }
        }
    }
}

impl JobDispatcher for NotificationDispatcher {
    fn dispatch(&self, job_id: &str, payload: Arc<JobPayload>) {
        let notifier = self.notifier.clone();
        let sampler = self.sampler.clone();
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let request = match Self::render(&notifier, sampler, &payload).await {
                Ok(request) => request,
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "定时任务正文渲染失败，本次跳过");
                    return;
                }
            };

            match notifier.submit(request).wait().await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| !o.succeeded).count();
                    info!(
                        job_id = %job_id,
                        recipients = outcomes.len(),
                        failed,
                        "定时任务投递完成"
                    );
                }
                Err(err) => error!(job_id = %job_id, error = %err, "定时任务投递异常"),
            }
        });
    }
}
