//! 投递引擎
//!
//! 对请求中的每个接收方独立并发投递：限流准入 → 带超时的传输调用 →
//! 瞬时失败按指数退避重试（平台限流时至少等待平台要求的时长），
//! 永久失败立即放弃。每个接收方恰好产出一个结果，
//! 单个接收方的失败不会阻塞或取消其他接收方。
//!
//! 同一接收方同一时刻最多只有一个投递在途：跨请求按接收方串行。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use notifier_shared::config::DeliveryConfig;
use notifier_shared::observability::metrics;
use notifier_shared::retry::{RetryPolicy, retry_with_hint};

use crate::error::DeliveryError;
use crate::model::{DeliveryOutcome, NotificationRequest, RecipientId};
use crate::rate_limiter::RateLimiter;
use crate::transport::{Transport, TransportResult};

/// 投递参数
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub retry: RetryPolicy,
    /// 等待限流准入的上限
    pub max_admission_wait: Duration,
    /// 单次传输调用的超时
    pub transport_timeout: Duration,
    /// 同时进行的传输调用上限
    pub max_concurrency: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl DeliverySettings {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.base_delay_ms),
                max_delay: Duration::from_millis(config.max_delay_ms),
                multiplier: 2.0,
                jitter: config.jitter,
            },
            max_admission_wait: Duration::from_secs(config.max_admission_wait_secs),
            transport_timeout: Duration::from_secs(config.transport_timeout_secs),
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}

/// 投递引擎
pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    settings: DeliverySettings,
    workers: Semaphore,
    /// 接收方 → 在途锁
    recipient_locks: parking_lot::Mutex<HashMap<RecipientId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeliveryEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            transport,
            limiter,
            workers: Semaphore::new(settings.max_concurrency),
            settings,
            recipient_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// 投递到请求中的全部接收方，结果顺序与接收方顺序一致
    pub async fn deliver(&self, request: &NotificationRequest) -> Vec<DeliveryOutcome> {
        let outcomes = join_all(
            request
                .recipients()
                .iter()
                .map(|recipient| self.deliver_one(recipient, request)),
        )
        .await;

        let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
        info!(
            recipients = outcomes.len(),
            succeeded,
            failed = outcomes.len() - succeeded,
            category = ?request.category(),
            "通知投递完成"
        );
        outcomes
    }

    async fn deliver_one(
        &self,
        recipient: &RecipientId,
        request: &NotificationRequest,
    ) -> DeliveryOutcome {
        let lock = self.recipient_lock(recipient);
        let guard = lock.lock().await;

        let started = Instant::now();
        let invocations = AtomicU32::new(0);
        let invocations_ref = &invocations;

        let report = retry_with_hint(
            &self.settings.retry,
            "deliver",
            |failed: &FailedAttempt| failed.error.is_transient(),
            |failed: &FailedAttempt| failed.retry_after,
            |attempt| async move {
                self.limiter
                    .acquire(1.0, self.settings.max_admission_wait)
                    .await?;

                let _permit = self.workers.acquire().await.map_err(|_| {
                    DeliveryError::PermanentDeliveryFailure("投递工作池已关闭".to_string())
                })?;

                invocations_ref.fetch_add(1, Ordering::SeqCst);
                let result = self.invoke(recipient, request).await;
                if let Err(failed) = &result {
                    warn!(
                        recipient = %recipient,
                        attempt,
                        error = %failed.error,
                        retry_after_ms = failed.retry_after.map(|d| d.as_millis() as u64),
                        "传输调用失败"
                    );
                }
                result
            },
        )
        .await;

        drop(guard);
        self.release_recipient_lock(recipient, &lock);

        let attempts = invocations.load(Ordering::SeqCst);
        let elapsed = started.elapsed().as_secs_f64();

        match report.result {
            Ok(()) => {
                metrics::record_delivery("succeeded", attempts, elapsed);
                DeliveryOutcome::success(recipient.clone(), attempts)
            }
            Err(FailedAttempt { error: err, .. }) => {
                let status = match err {
                    DeliveryError::RateLimitAbandoned { .. } => "rate_limited",
                    _ => "failed",
                };
                metrics::record_delivery(status, attempts, elapsed);
                warn!(
                    recipient = %recipient,
                    attempts,
                    error = %err,
                    "接收方投递失败"
                );
                DeliveryOutcome::failure(recipient.clone(), attempts, err)
            }
        }
    }

    /// 单次传输调用，外层再包一层超时兜底
    async fn invoke(
        &self,
        recipient: &RecipientId,
        request: &NotificationRequest,
    ) -> Result<(), FailedAttempt> {
        let timeout = self.settings.transport_timeout;

        let (kind, call) = match request.attachment() {
            Some(attachment) => {
                let caption = attachment
                    .caption
                    .as_deref()
                    .or_else(|| Some(request.body()).filter(|b| !b.trim().is_empty()));
                (
                    "file",
                    self.transport
                        .deliver_file(recipient, &attachment.path, caption, timeout),
                )
            }
            None => (
                "text",
                self.transport
                    .deliver_text(recipient, request.body(), request.format(), timeout),
            ),
        };

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_delivery_attempt(kind, "timeout");
                return Err(DeliveryError::TransientDeliveryFailure(format!(
                    "传输调用超时 ({}ms)",
                    timeout.as_millis()
                ))
                .into());
            }
        };

        metrics::record_delivery_attempt(kind, result.label());
        match result {
            TransportResult::Success => Ok(()),
            TransportResult::TransientFailure(reason) => {
                Err(DeliveryError::TransientDeliveryFailure(reason).into())
            }
            TransportResult::Throttled {
                reason,
                retry_after,
            } => Err(FailedAttempt {
                error: DeliveryError::TransientDeliveryFailure(reason),
                retry_after: Some(retry_after),
            }),
            TransportResult::PermanentFailure(reason) => {
                Err(DeliveryError::PermanentDeliveryFailure(reason).into())
            }
        }
    }

    fn recipient_lock(&self, recipient: &RecipientId) -> Arc<tokio::sync::Mutex<()>> {
        self.recipient_locks
            .lock()
            .entry(recipient.clone())
            .or_default()
            .clone()
    }

    /// 没有其他等待者时移除锁条目，避免表无限增长
    fn release_recipient_lock(&self, recipient: &RecipientId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.recipient_locks.lock();
        // 表内一份 + 调用方持有一份
        if Arc::strong_count(lock) <= 2 {
            locks.remove(recipient);
        }
    }

    #[cfg(test)]
    fn tracked_recipients(&self) -> usize {
        self.recipient_locks.lock().len()
    }
}

/// 单次尝试的失败，附带平台要求的最短重试等待
#[derive(Debug)]
struct FailedAttempt {
    error: DeliveryError,
    retry_after: Option<Duration>,
}

impl From<DeliveryError> for FailedAttempt {
    fn from(error: DeliveryError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

impl std::fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}
