//! 统一可观测性模块
//!
//! 提供 metrics、logging 的统一初始化和管理。
//! 所有入口（API 服务、CLI）通过单一入口点配置可观测性，确保一致的指标命名。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::AppConfig;

/// 可观测性配置
///
/// 由 [`AppConfig`] 派生，入口程序也可直接构造（如 CLI 仅需日志）。
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识指标的来源
    pub service_name: String,

    /// Prometheus 指标导出端口，None 时不启动导出
    pub metrics_port: Option<u16>,

    /// 日志级别（如 "info", "debug"），RUST_LOG 优先
    pub log_level: String,

    /// 是否启用 JSON 格式日志
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            metrics_port: Some(9090),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// 从应用配置派生
    pub fn from_app_config(config: &AppConfig) -> Self {
        let obs = &config.observability;
        Self {
            service_name: config.service_name.clone(),
            metrics_port: obs.metrics_enabled.then_some(obs.metrics_port),
            log_level: obs.log_level.clone(),
            json_logs: obs.log_format.eq_ignore_ascii_case("json"),
        }
    }
}

/// 可观测性资源守卫
///
/// 持有指标服务器的生命周期，drop 时记录关闭日志。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            _metrics_handle: None,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（结构化日志）
/// 2. Metrics（Prometheus 指标，可选）
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    info!(
        service = %config.service_name,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );

    let metrics_handle = match config.metrics_port {
        Some(port) => Some(metrics::init(&config.service_name, port).await?),
        None => None,
    };

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
    })
}
