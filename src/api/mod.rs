use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, rejection::JsonRejection},
    http::request::Parts,
    middleware,
    routing::get,
};
use serde::de::DeserializeOwned;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::chat::ChatHub;
use crate::config::Config;
use crate::error::{ApiErrorWithMeta, LedgerError};
use crate::notify::Notifier;
use crate::responses::{RequestMeta, meta_middleware};
use crate::store::Store;
use crate::types::User;
use crate::users;

mod chat;
mod connections;
mod favorites;
mod ledger;
mod notifications;
mod profile;

const X_USER_ID: &str = "X-User-ID";

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The persistence backend.
    pub store: Arc<dyn Store>,
    /// In-app and push notification dispatch.
    pub notifier: Notifier,
    /// Live chat fan-out.
    pub hub: Arc<ChatHub>,
    /// The application configuration.
    pub config: Config,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(profile::routes())
        .merge(connections::routes())
        .merge(ledger::routes())
        .merge(favorites::routes())
        .merge(notifications::routes())
        .merge(chat::routes())
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

fn request_meta(parts: &Parts) -> RequestMeta {
    parts.extensions.get::<RequestMeta>().cloned().unwrap_or_default()
}

/// The authenticated user, resolved from the gateway's `X-User-ID` header.
#[derive(Debug, Clone)]
pub struct Caller(pub User);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let meta = request_meta(parts);
        let Some(value) = parts.headers.get(X_USER_ID) else {
            return Err(LedgerError::Unauthenticated("`X-User-ID` header is missing".into())
                .with_meta(meta));
        };
        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                LedgerError::Unauthenticated("invalid user id".into()).with_meta(meta.clone())
            })?;

        users::authenticate(state.store.as_ref(), user_id)
            .await
            .map(Caller)
            .map_err(|e| e.with_meta(meta))
    }
}

/// `Json` whose rejections use the API error body.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let meta = req
            .extensions()
            .get::<RequestMeta>()
            .cloned()
            .unwrap_or_default();
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(rejection_error(rejection).with_meta(meta)),
        }
    }
}

fn rejection_error(rejection: JsonRejection) -> LedgerError {
    LedgerError::validation(rejection.body_text())
}

/// `Path` whose rejections use the API error body.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => {
                Err(LedgerError::validation(rejection.body_text()).with_meta(request_meta(parts)))
            }
        }
    }
}

/// `Query` whose rejections use the API error body.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => {
                Err(LedgerError::validation(rejection.body_text()).with_meta(request_meta(parts)))
            }
        }
    }
}
