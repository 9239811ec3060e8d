//! 订阅管理 API

use axum::{
    Json,
    extract::{Path, State},
};

use notification_worker::Category;

use super::parse_recipient;
use crate::dto::{
    ApiResponse, RecipientSubscriptions, SubscribeRequest, SubscriptionChange,
    SubscriptionsResponse,
};
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// 全部订阅与统计
///
/// GET /api/v1/subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
) -> Json<ApiResponse<SubscriptionsResponse>> {
    let registry = state.notifier.registry();
    Json(ApiResponse::success(SubscriptionsResponse {
        subscriptions: registry.all_subscriptions(),
        stats: registry.stats(),
    }))
}

/// GET /api/v1/subscriptions/{chat_id}
pub async fn get_subscriptions(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ApiResponse<RecipientSubscriptions>>> {
    let recipient = parse_recipient(&chat_id)?;
    let categories = state
        .notifier
        .registry()
        .list_subscriptions(&recipient)
        .into_iter()
        .collect();
    Ok(Json(ApiResponse::success(RecipientSubscriptions {
        chat_id: recipient.to_string(),
        categories,
    })))
}

/// POST /api/v1/subscriptions/{chat_id}
pub async fn subscribe(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<ApiResponse<SubscriptionChange>>> {
    let recipient = parse_recipient(&chat_id)?;
    let category: Category = req.category.parse().map_err(ApiError::from)?;
    let changed = state.notifier.registry().subscribe(recipient.clone(), category);

    Ok(Json(ApiResponse::success(SubscriptionChange {
        chat_id: recipient.to_string(),
        category,
        changed,
    })))
}

/// DELETE /api/v1/subscriptions/{chat_id}/{category}
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path((chat_id, category)): Path<(String, String)>,
) -> Result<Json<ApiResponse<SubscriptionChange>>> {
    let recipient = parse_recipient(&chat_id)?;
    let category: Category = category.parse().map_err(ApiError::from)?;
    let changed = state.notifier.registry().unsubscribe(&recipient, category);

    Ok(Json(ApiResponse::success(SubscriptionChange {
        chat_id: recipient.to_string(),
        category,
        changed,
    })))
}
