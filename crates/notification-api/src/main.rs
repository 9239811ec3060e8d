//! 通知服务
//!
//! HTTP API + 定时任务调度 + 系统监控 + 聊天命令，共用一个投递引擎。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use notification_api::{ApiSettings, AppState, routes};
use notification_worker::transport::TelegramTransport;
use notification_worker::{
    CommandLoop, DeliveryEngine, DeliverySettings, MetricsSampler, NotificationDispatcher,
    Notifier, RateLimiter, Scheduler, SubscriptionRegistry, SysinfoSampler, SystemMonitor,
};
use notifier_shared::config::AppConfig;
use notifier_shared::observability::{self, ObservabilityConfig};

const SERVICE_NAME: &str = "notification-server";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    config.validate()?;

    let _guard = observability::init(&ObservabilityConfig::from_app_config(&config)).await?;
    info!(
        environment = %config.environment,
        addr = %config.server_addr(),
        "Starting notification-server"
    );

    if config.telegram.bot_token.is_empty() {
        warn!("未配置 telegram.bot_token，所有投递都会失败");
    }
    let settings = ApiSettings::from_config(&config)?;
    if settings.api_secret_key.is_none() {
        warn!("未配置 security.api_secret_key，/api/v1 不做认证");
    }
    if settings.webhook_secret.is_none() {
        warn!("未配置 security.webhook_secret，Webhook 将拒绝所有请求");
    }

    // 投递链路：传输层 → 限流 → 引擎 → 门面
    let transport = Arc::new(TelegramTransport::new(&config.telegram));
    let limiter = Arc::new(RateLimiter::new(
        config.delivery.rate_limit_capacity,
        config.delivery.rate_limit_refill_per_sec,
    ));
    let engine = Arc::new(DeliveryEngine::new(
        transport.clone(),
        limiter,
        DeliverySettings::from_config(&config.delivery),
    ));
    let registry = Arc::new(SubscriptionRegistry::new());
    let notifier = Arc::new(Notifier::new(engine, registry));

    let sampler: Arc<dyn MetricsSampler> = Arc::new(SysinfoSampler::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        notifier.clone(),
        Some(sampler.clone()),
    ));
    let scheduler = Arc::new(Scheduler::with_system_clock(dispatcher));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if config.scheduler.enabled {
        if config.scheduler.default_jobs {
            scheduler.register_default_jobs()?;
        }
        background.push(tokio::spawn(scheduler.clone().run(shutdown_rx.clone())));
    } else {
        info!("定时任务调度未启用");
    }

    let monitor = if config.monitoring.enabled {
        let monitor = Arc::new(SystemMonitor::new(
            notifier.clone(),
            sampler.clone(),
            &config.monitoring,
        ));
        background.push(tokio::spawn(monitor.clone().run(shutdown_rx.clone())));
        Some(monitor)
    } else {
        info!("系统监控未启用");
        None
    };

    if config.telegram.polling_enabled && !config.telegram.bot_token.is_empty() {
        let command_loop = Arc::new(CommandLoop::new(
            transport,
            notifier.clone(),
            Some(sampler),
            Duration::from_secs(config.telegram.poll_timeout_secs),
        ));
        background.push(tokio::spawn(command_loop.run(shutdown_rx.clone())));
    } else {
        info!("聊天命令轮询未启用");
    }

    let state = AppState::new(notifier, scheduler, monitor, settings);
    let app = routes::app(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 通知后台循环退出并等待
    let _ = shutdown_tx.send(true);
    for task in background {
        if let Err(err) = task.await {
            warn!(error = %err, "后台任务异常退出");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
