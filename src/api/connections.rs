use axum::{
    Extension, Router,
    extract::State,
    routing::{delete, get, patch, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiPath, AppState, Caller, JsonBody};
use crate::connections::{self, Connection, Recipient, RequestView, StatusChange};
use crate::error::{ApiErrorWithMeta, LedgerError};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{ConnectionRequest, RequestFilter, RequestStatus, User};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/connections", post(send_handler))
        .route("/connections/sent", get(sent_handler))
        .route("/connections/received", get(received_handler))
        .route("/connections/pending", get(pending_handler))
        .route("/connections/connected", get(connected_handler))
        .route("/connections/{id}/status", patch(status_handler))
        .route("/connections/{id}", delete(delete_handler))
}

/// The request to connect with another user, by id or e-mail.
#[derive(Deserialize)]
pub struct SendRequest {
    pub receiver_id: Option<i64>,
    pub email: Option<String>,
}

impl SendRequest {
    fn recipient(self) -> Result<Recipient, LedgerError> {
        match (self.receiver_id, self.email) {
            (Some(id), None) => Ok(Recipient::Id(id)),
            (None, Some(email)) if !email.trim().is_empty() => Ok(Recipient::Email(email)),
            _ => Err(LedgerError::validation(
                "provide exactly one of receiver_id or email",
            )),
        }
    }
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: RequestStatus,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub request_id: i64,
    pub relationship_id: Option<i64>,
}

async fn send_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    JsonBody(req): JsonBody<SendRequest>,
) -> Result<ApiOk<ConnectionRequest>, ApiErrorWithMeta> {
    let recipient = req.recipient().map_err(|e| e.with_meta(meta.clone()))?;
    let request = connections::send_request(st.store.as_ref(), &st.notifier, &user, recipient)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::created("connection request sent", request, meta))
}

async fn list(
    st: &AppState,
    meta: RequestMeta,
    user: &User,
    filter: RequestFilter,
) -> Result<ApiOk<Vec<RequestView>>, ApiErrorWithMeta> {
    let views = connections::list_requests(st.store.as_ref(), user, filter)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("connection requests fetched", views, meta))
}

async fn sent_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<Vec<RequestView>>, ApiErrorWithMeta> {
    list(&st, meta, &user, RequestFilter::Sent).await
}

async fn received_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<Vec<RequestView>>, ApiErrorWithMeta> {
    list(&st, meta, &user, RequestFilter::Received).await
}

async fn pending_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<Vec<RequestView>>, ApiErrorWithMeta> {
    list(&st, meta, &user, RequestFilter::PendingReceived).await
}

async fn connected_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<Vec<Connection>>, ApiErrorWithMeta> {
    let connected = connections::list_connected(st.store.as_ref(), &user)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("connections fetched", connected, meta))
}

async fn status_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    JsonBody(req): JsonBody<StatusRequest>,
) -> Result<ApiOk<StatusChange>, ApiErrorWithMeta> {
    let change =
        connections::update_status(st.store.as_ref(), &st.notifier, &user, id, req.status)
            .await
            .map_err(|e| e.with_meta(meta.clone()))?;
    let message = format!("request {}", change.request.status);
    Ok(ApiOk::ok(message, change, meta))
}

async fn delete_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<DeleteResponse>, ApiErrorWithMeta> {
    let relationship_id =
        connections::delete_connection(st.store.as_ref(), &st.notifier, &user, id)
            .await
            .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok(
        "connection removed",
        DeleteResponse {
            request_id: id,
            relationship_id,
        },
        meta,
    ))
}
