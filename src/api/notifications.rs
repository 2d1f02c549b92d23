//! User-facing notification endpoints.

use crate::api::response::Envelope;
use crate::auth::middleware::require_owner;
use crate::auth::models::Claims;
use crate::db::notifications::Notification;
use crate::errors::AppError;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub user_id: String,
    #[serde(default)]
    pub is_read: Option<bool>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<Envelope<Vec<Notification>>>, AppError> {
    require_owner(&claims, &query.user_id).map_err(|_| AppError::Forbidden)?;
    let unread_only = query.is_read == Some(false);
    let notifications = state.db.list_notifications(&query.user_id, unread_only).await?;
    Ok(Json(Envelope::ok(notifications)))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: String,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<MarkReadRequest>,
) -> Result<Json<Envelope<()>>, AppError> {
    require_owner(&claims, &payload.user_id).map_err(|_| AppError::Forbidden)?;
    let updated = state.db.mark_notification_read(&id, &payload.user_id).await?;
    if !updated {
        return Err(AppError::NotFound(id));
    }
    Ok(Json(Envelope::ok_with_message((), "notification marked read")))
}
