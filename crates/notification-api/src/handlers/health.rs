//! 健康检查

use std::time::Duration;

use axum::{Json, extract::State};
use chrono::Utc;

use crate::dto::{ComponentStatus, HealthResponse};
use crate::state::AppState;

const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /health
///
/// 传输层不可达时仍返回 200，由 status 字段区分
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let transport = state.notifier.engine().transport();
    let connected = transport.check_connectivity(CONNECTIVITY_TIMEOUT).await;

    Json(HealthResponse {
        status: if connected { "healthy" } else { "unhealthy" },
        transport: transport.name(),
        transport_connected: connected,
        services: ComponentStatus {
            notification: true,
            scheduler: state.settings.scheduler_enabled,
            monitoring: state.monitor.is_some(),
        },
        scheduled_jobs: state.scheduler.list_jobs().len(),
        timestamp: Utc::now(),
    })
}
