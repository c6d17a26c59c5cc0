use axum::{
    Extension, Router,
    extract::State,
    routing::{get, patch},
};
use serde::{Deserialize, Serialize};

use super::{ApiPath, ApiQuery, AppState, Caller};
use crate::error::ApiErrorWithMeta;
use crate::responses::{ApiOk, RequestMeta};
use crate::types::Notification;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_handler))
        .route("/notifications/unread-count", get(unread_count_handler))
        .route("/notifications/read-all", patch(read_all_handler))
        .route("/notifications/{id}/read", patch(read_handler))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Serialize)]
pub struct UnreadCount {
    pub unread_count: u64,
}

#[derive(Serialize)]
pub struct ReadAll {
    pub updated: u64,
}

async fn list_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<ApiOk<Vec<Notification>>, ApiErrorWithMeta> {
    let found = st
        .notifier
        .list(user.id, query.unread)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("notifications fetched", found, meta))
}

async fn unread_count_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<UnreadCount>, ApiErrorWithMeta> {
    let unread_count = st
        .notifier
        .unread_count(user.id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok(
        "unread count fetched",
        UnreadCount { unread_count },
        meta,
    ))
}

async fn read_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<Notification>, ApiErrorWithMeta> {
    let notification = st
        .notifier
        .mark_read(id, user.id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("notification marked read", notification, meta))
}

async fn read_all_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<ReadAll>, ApiErrorWithMeta> {
    let updated = st
        .notifier
        .mark_all_read(user.id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("notifications marked read", ReadAll { updated }, meta))
}
