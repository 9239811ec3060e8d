//! 路由配置

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};

use notifier_shared::observability::middleware as obs_middleware;

use crate::{handlers, middleware as api_middleware, state::AppState};

/// 需要 API Key 的业务路由，挂载在 /api/v1 下
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/notify", post(handlers::notify::send_notification))
        // 订阅管理
        .route(
            "/subscriptions",
            get(handlers::subscription::list_subscriptions),
        )
        .route(
            "/subscriptions/{chat_id}",
            get(handlers::subscription::get_subscriptions).post(handlers::subscription::subscribe),
        )
        .route(
            "/subscriptions/{chat_id}/{category}",
            delete(handlers::subscription::unsubscribe),
        )
        // 定时任务
        .route(
            "/schedule",
            get(handlers::schedule::list_jobs).post(handlers::schedule::create_job),
        )
        .route("/schedule/{job_id}", delete(handlers::schedule::delete_job))
        .route(
            "/schedule/{job_id}/pause",
            post(handlers::schedule::pause_job),
        )
        .route(
            "/schedule/{job_id}/resume",
            post(handlers::schedule::resume_job),
        )
        // 系统监控
        .route("/system/metrics", get(handlers::system::get_metrics))
        .route("/system/report", post(handlers::system::send_report))
        .route_layer(middleware::from_fn_with_state(
            state,
            api_middleware::api_key_auth,
        ))
}

/// 完整应用：健康检查、Webhook、业务 API 与公共中间件
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/webhook/notify", post(handlers::webhook::webhook_notify))
        .nest("/api/v1", api_routes(state.clone()))
        .layer(middleware::from_fn(api_middleware::security_headers))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
