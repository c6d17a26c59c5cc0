use axum::{
    Extension, Router,
    extract::State,
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::{ApiPath, AppState, Caller, JsonBody};
use crate::error::ApiErrorWithMeta;
use crate::favorites;
use crate::responses::{ApiOk, RequestMeta};
use crate::types::Favorite;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/favorites", get(list_handler).post(add_handler))
        .route(
            "/favorites/{business_id}",
            get(check_handler).delete(remove_handler),
        )
}

#[derive(Deserialize)]
pub struct AddFavoriteRequest {
    pub business_id: i64,
}

#[derive(Serialize)]
pub struct FavoriteStatus {
    pub business_id: i64,
    pub is_favorite: bool,
}

async fn list_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<Vec<Favorite>>, ApiErrorWithMeta> {
    let found = favorites::list(st.store.as_ref(), &user)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("favorites fetched", found, meta))
}

async fn add_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    JsonBody(req): JsonBody<AddFavoriteRequest>,
) -> Result<ApiOk<Favorite>, ApiErrorWithMeta> {
    let favorite = favorites::add(st.store.as_ref(), &user, req.business_id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::created("business added to favorites", favorite, meta))
}

async fn check_handler(
    State(st): State<AppState>,
    ApiPath(business_id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<FavoriteStatus>, ApiErrorWithMeta> {
    let is_favorite = favorites::is_favorite(st.store.as_ref(), &user, business_id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok(
        "favorite status fetched",
        FavoriteStatus {
            business_id,
            is_favorite,
        },
        meta,
    ))
}

async fn remove_handler(
    State(st): State<AppState>,
    ApiPath(business_id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<FavoriteStatus>, ApiErrorWithMeta> {
    favorites::remove(st.store.as_ref(), &user, business_id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok(
        "business removed from favorites",
        FavoriteStatus {
            business_id,
            is_favorite: false,
        },
        meta,
    ))
}
