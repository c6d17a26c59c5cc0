use axum::{
    Extension, Router,
    extract::State,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{ApiQuery, AppState, Caller, JsonBody};
use crate::error::ApiErrorWithMeta;
use crate::responses::{ApiOk, RequestMeta};
use crate::types::User;
use crate::users::{self, Registration, SearchResult};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register_handler))
        .route("/users/me", get(me_handler))
        .route("/users/me/device-token", put(device_token_handler))
        .route("/users/search", get(search_handler))
}

/// The request to store or clear the caller's push token.
#[derive(Deserialize)]
pub struct DeviceTokenRequest {
    pub device_token: Option<String>,
}

#[derive(Serialize)]
pub struct DeviceTokenResponse {
    pub registered: bool,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

async fn register_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    JsonBody(req): JsonBody<Registration>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    let user = users::register(st.store.as_ref(), req)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::created("user registered", user, meta))
}

async fn me_handler(
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    Ok(ApiOk::ok("profile fetched", user, meta))
}

async fn device_token_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    JsonBody(req): JsonBody<DeviceTokenRequest>,
) -> Result<ApiOk<DeviceTokenResponse>, ApiErrorWithMeta> {
    let registered = req.device_token.as_deref().is_some_and(|t| !t.trim().is_empty());
    users::set_device_token(st.store.as_ref(), &user, req.device_token)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok(
        "device token updated",
        DeviceTokenResponse { registered },
        meta,
    ))
}

async fn search_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<ApiOk<Vec<SearchResult>>, ApiErrorWithMeta> {
    let results = users::search(st.store.as_ref(), &user, &query.q)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("users found", results, meta))
}
