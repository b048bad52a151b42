use axum::{
    Json,
    extract::{Query, State},
};

use super::super::AppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

#[derive(serde::Deserialize)]
pub struct NotificationsQuery {
    limit: Option<usize>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationsQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Json(serde_json::json!({
        "success": true,
        "notifications": state.notifier.recent(limit),
    }))
}
