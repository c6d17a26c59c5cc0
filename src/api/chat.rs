use axum::{
    Extension, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{ApiPath, ApiQuery, AppState, Caller, JsonBody};
use crate::chat::{self, ClientFrame, OutgoingMessage};
use crate::error::ApiErrorWithMeta;
use crate::responses::{ApiOk, Pagination, RequestMeta};
use crate::types::{ChatMessage, ChatRoom, User};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat/rooms", get(rooms_handler))
        .route(
            "/chat/rooms/{id}/messages",
            get(history_handler).post(send_handler),
        )
        .route("/chat/rooms/{id}/read", post(read_handler))
        .route("/chat/rooms/{id}/ws", get(ws_handler))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Serialize)]
pub struct ReadResponse {
    pub room_id: i64,
    pub marked_read: u64,
}

async fn rooms_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<Vec<ChatRoom>>, ApiErrorWithMeta> {
    let rooms = chat::list_rooms(st.store.as_ref(), &user)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("chat rooms fetched", rooms, meta))
}

async fn history_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<ApiOk<Vec<ChatMessage>>, ApiErrorWithMeta> {
    let page = chat::history(st.store.as_ref(), &user, id, query.page, query.per_page)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    let pagination = Pagination::new(page.page, page.per_page, page.total);
    Ok(ApiOk::paginated(
        "messages fetched",
        page.messages,
        pagination,
        meta,
    ))
}

async fn send_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    JsonBody(req): JsonBody<OutgoingMessage>,
) -> Result<ApiOk<ChatMessage>, ApiErrorWithMeta> {
    let message = chat::send_message(st.store.as_ref(), &st.hub, &user, id, req)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::created("message sent", message, meta))
}

async fn read_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<ReadResponse>, ApiErrorWithMeta> {
    let marked_read = chat::mark_read(st.store.as_ref(), &st.hub, &user, id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok(
        "messages marked read",
        ReadResponse {
            room_id: id,
            marked_read,
        },
        meta,
    ))
}

async fn ws_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiErrorWithMeta> {
    let room = chat::room_for_participant(st.store.as_ref(), &user, id)
        .await
        .map_err(|e| e.with_meta(meta))?;
    Ok(ws.on_upgrade(move |socket| run_socket(st, user, room.id, socket)))
}

/// Pumps hub events out to the client and handles its inbound frames until
/// either side closes.
async fn run_socket(st: AppState, user: User, room_id: i64, socket: WebSocket) {
    info!(room_id, user_id = user.id, "chat socket opened");

    let (mut sink, mut stream) = socket.split();
    let mut events = st.hub.subscribe(room_id).await;
    let (reply_tx, mut reply_rx) = mpsc::channel::<serde_json::Value>(16);

    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => serde_json::to_string(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room_id, skipped, "chat subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(value) => serde_json::to_string(&value),
                    None => break,
                },
            };
            let Ok(text) = frame else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply_tx
                    .send(json!({ "type": "error", "error": format!("invalid frame: {e}") }))
                    .await;
                continue;
            }
        };
        match frame {
            ClientFrame::ChatMessage { message } => {
                if let Err(e) =
                    chat::send_message(st.store.as_ref(), &st.hub, &user, room_id, message).await
                {
                    debug!(room_id, user_id = user.id, error = %e, "socket message refused");
                    let _ = reply_tx
                        .send(json!({ "type": "error", "error": e.to_string() }))
                        .await;
                }
            }
            ClientFrame::Typing { is_typing } => {
                chat::publish_typing(&st.hub, &user, room_id, is_typing).await;
            }
        }
    }

    writer.abort();
    info!(room_id, user_id = user.id, "chat socket closed");
}
