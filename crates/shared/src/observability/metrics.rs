//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "delivery_attempts_total",
        "Total number of transport invocations"
    );
    metrics::describe_counter!(
        "deliveries_total",
        "Total number of per-recipient delivery outcomes"
    );
    metrics::describe_histogram!(
        "delivery_duration_seconds",
        "Per-recipient delivery duration in seconds, retries included"
    );

    metrics::describe_counter!(
        "rate_limit_admissions_total",
        "Total number of rate limiter admission decisions"
    );
    metrics::describe_histogram!(
        "rate_limit_wait_seconds",
        "Time spent waiting for rate limiter admission"
    );

    metrics::describe_counter!("scheduler_fires_total", "Total number of scheduled job fires");
    metrics::describe_gauge!("scheduler_jobs", "Number of live scheduled jobs");

    metrics::describe_gauge!("subscriptions", "Number of category subscriptions");
    metrics::describe_counter!("system_alerts_total", "Total number of system alerts sent");
    metrics::describe_counter!(
        "bot_commands_total",
        "Total number of chat commands handled by the bot"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次传输调用，result 取 success / transient / throttled / permanent / timeout
#[inline]
pub fn record_delivery_attempt(kind: &str, result: &str) {
    metrics::counter!(
        "delivery_attempts_total",
        "kind" => kind.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// 记录单个接收方的最终投递结果
#[inline]
pub fn record_delivery(status: &str, attempts: u32, duration_secs: f64) {
    metrics::counter!(
        "deliveries_total",
        "status" => status.to_string(),
        "attempts" => attempts.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "delivery_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// 记录限流准入结果，outcome 取 admitted / abandoned
#[inline]
pub fn record_rate_limit(outcome: &str, waited_secs: f64) {
    metrics::counter!(
        "rate_limit_admissions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!("rate_limit_wait_seconds").record(waited_secs);
}

/// 记录机器人命令
#[inline]
pub fn record_bot_command(command: &str) {
    metrics::counter!(
        "bot_commands_total",
        "command" => command.to_string()
    )
    .increment(1);
}

/// 记录定时任务触发
#[inline]
pub fn record_scheduler_fire(trigger: &str) {
    metrics::counter!(
        "scheduler_fires_total",
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

/// 更新存活任务数
#[inline]
pub fn set_scheduler_jobs(count: usize) {
    metrics::gauge!("scheduler_jobs").set(count as f64);
}

/// 更新订阅数
#[inline]
pub fn set_subscriptions(count: usize) {
    metrics::gauge!("subscriptions").set(count as f64);
}

/// 记录系统告警
#[inline]
pub fn record_system_alert(metric: &str) {
    metrics::counter!(
        "system_alerts_total",
        "metric" => metric.to_string()
    )
    .increment(1);
}
