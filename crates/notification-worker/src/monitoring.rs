//! 系统监控
//!
//! 周期性采集 CPU、内存、磁盘使用率，越过阈值时向 system 分类的订阅者
//! 发送告警。同一指标在冷却窗口内只告警一次。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use notifier_shared::config::MonitoringConfig;
use notifier_shared::observability::metrics;

use crate::error::NotificationError;
use crate::formatters::{format_alert, format_system_report};
use crate::model::{Category, FormatMode, NotificationRequest, RecipientId};
use crate::service::{DeliveryHandle, Notifier};

/// 一次采样结果
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_percent: f64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    /// 1 / 5 / 15 分钟负载
    pub load_average: [f64; 3],
}

/// 系统指标采集
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSampler: Send + Sync {
    fn sample(&self) -> Result<SystemMetrics, NotificationError>;
}

/// 在阻塞线程池上采样
///
/// sysinfo 刷新与挂载点枚举是阻塞调用，异步上下文统一经由此函数采样。
pub async fn sample_blocking(
    sampler: Arc<dyn MetricsSampler>,
) -> Result<SystemMetrics, NotificationError> {
    tokio::task::spawn_blocking(move || sampler.sample())
        .await
        .map_err(|err| NotificationError::MetricsUnavailable(format!("采样任务异常退出: {err}")))?
}

/// 基于 sysinfo 的采集器
///
/// CPU 使用率是两次刷新之间的均值，首次采样可能为 0。
pub struct SysinfoSampler {
    system: Mutex<System>,
    disk_path: PathBuf,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self::with_disk_path("/")
    }

    pub fn with_disk_path(path: impl Into<PathBuf>) -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        system.refresh_cpu_all();
        Self {
            system: Mutex::new(system),
            disk_path: path.into(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSampler for SysinfoSampler {
    fn sample(&self) -> Result<SystemMetrics, NotificationError> {
        let (cpu_percent, memory_used, memory_total) = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.refresh_memory();
            (
                system.global_cpu_usage() as f64,
                system.used_memory(),
                system.total_memory(),
            )
        };

        let (disk_used, disk_total) = disk_usage(&self.disk_path).ok_or_else(|| {
            NotificationError::MetricsUnavailable(format!(
                "找不到挂载点: {}",
                self.disk_path.display()
            ))
        })?;

        let load = System::load_average();
        Ok(SystemMetrics {
            cpu_percent,
            memory_percent: percent(memory_used, memory_total),
            memory_used_bytes: memory_used,
            memory_total_bytes: memory_total,
            disk_percent: percent(disk_used, disk_total),
            disk_used_bytes: disk_used,
            disk_total_bytes: disk_total,
            load_average: [load.one, load.five, load.fifteen],
        })
    }
}

/// 取包含该路径的最长挂载点的 (已用, 总量)
fn disk_usage(path: &Path) -> Option<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| {
            let total = disk.total_space();
            (total.saturating_sub(disk.available_space()), total)
        })
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// 受监控的指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Memory => "Memory",
            Self::Disk => "Disk",
        }
    }
}

/// 告警阈值（百分比）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: 80.0,
            memory: 80.0,
            disk: 90.0,
        }
    }
}

/// 系统监控器
pub struct SystemMonitor {
    notifier: Arc<Notifier>,
    sampler: Arc<dyn MetricsSampler>,
    thresholds: Thresholds,
    interval: Duration,
    cooldown: Duration,
    last_alerts: Mutex<HashMap<Metric, Instant>>,
}

impl SystemMonitor {
    pub fn new(
        notifier: Arc<Notifier>,
        sampler: Arc<dyn MetricsSampler>,
        config: &MonitoringConfig,
    ) -> Self {
        Self {
            notifier,
            sampler,
            thresholds: Thresholds {
                cpu: config.cpu_threshold,
                memory: config.memory_threshold,
                disk: config.disk_threshold,
            },
            interval: Duration::from_secs(config.check_interval_secs.max(1)),
            cooldown: Duration::from_secs(config.alert_cooldown_secs),
            last_alerts: Mutex::new(HashMap::new()),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub async fn current_metrics(&self) -> Result<SystemMetrics, NotificationError> {
        sample_blocking(self.sampler.clone()).await
    }

    /// 采样一次并发送越限告警，返回本次实际告警的指标
    pub async fn check_once(&self) -> Result<Vec<Metric>, NotificationError> {
        let sample = self.current_metrics().await?;
        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            disk = sample.disk_percent,
            "系统指标已采集"
        );

        let checks = [
            (Metric::Cpu, sample.cpu_percent, self.thresholds.cpu),
            (Metric::Memory, sample.memory_percent, self.thresholds.memory),
            (Metric::Disk, sample.disk_percent, self.thresholds.disk),
        ];

        let mut alerted = Vec::new();
        for (metric, value, threshold) in checks {
            if value <= threshold {
                continue;
            }
            if !self.try_start_cooldown(metric) {
                debug!(metric = metric.label(), "告警冷却中，跳过");
                continue;
            }
            self.send_alert(metric, value, threshold)?;
            alerted.push(metric);
        }
        Ok(alerted)
    }

    /// 冷却窗口外时记录本次告警时间并返回 true
    fn try_start_cooldown(&self, metric: Metric) -> bool {
        let now = Instant::now();
        let mut last_alerts = self.last_alerts.lock();
        match last_alerts.get(&metric) {
            Some(last) if now.duration_since(*last) < self.cooldown => false,
            _ => {
                last_alerts.insert(metric, now);
                true
            }
        }
    }

    fn send_alert(&self, metric: Metric, value: f64, threshold: f64) -> Result<(), NotificationError> {
        let body = format_alert(
            metric.label(),
            value,
            threshold,
            "%",
            FormatMode::Markdown,
            Utc::now(),
        );
        let request = NotificationRequest::builder(body)
            .format(FormatMode::Markdown)
            .category(Category::System)
            .build()?;

        metrics::record_system_alert(metric.label());
        let handle = self.notifier.submit(request);
        if handle.recipients().is_empty() {
            warn!(metric = metric.label(), "没有系统告警订阅者");
        } else {
            info!(
                metric = metric.label(),
                value,
                threshold,
                recipients = handle.recipients().len(),
                "系统告警已提交"
            );
        }
        Ok(())
    }

    /// 发送系统状态报告：指定接收方，或全部 system 订阅者
    pub async fn send_report(
        &self,
        recipient: Option<RecipientId>,
    ) -> Result<DeliveryHandle, NotificationError> {
        let sample = self.current_metrics().await?;
        let body = format_system_report(&sample, FormatMode::Markdown);
        let builder = NotificationRequest::builder(body).format(FormatMode::Markdown);
        let request = match recipient {
            Some(recipient) => builder.recipient(recipient),
            None => builder.category(Category::System),
        }
        .build()?;
        Ok(self.notifier.submit(request))
    }

    /// 监控循环，直到 shutdown 变为 true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "系统监控已启动");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.check_once().await {
                        error!(error = %err, "系统指标检查失败");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("系统监控已停止");
    }
}
