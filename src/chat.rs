//! Per-connection chat: persisted history plus live fan-out.
//!
//! Every room has its own broadcast channel. Delivery to live subscribers is
//! best effort and at most once; anything missed is recovered from history.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::store::Store;
use crate::types::{ChatMessage, ChatRoom, MessageKind, NewMessage, RequestStatus, User};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Frames pushed to room subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    ChatMessage {
        message: ChatMessage,
    },
    Typing {
        room_id: i64,
        user_id: i64,
        is_typing: bool,
    },
    MessagesRead {
        room_id: i64,
        reader_id: i64,
        count: u64,
    },
}

/// Frames a WebSocket client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ChatMessage {
        #[serde(flatten)]
        message: OutgoingMessage,
    },
    Typing {
        #[serde(default = "default_true")]
        is_typing: bool,
    },
}

fn default_true() -> bool {
    true
}

/// A message as submitted by a participant.
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingMessage {
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_url: Option<String>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

/// Room-scoped publish/subscribe.
pub struct ChatHub {
    capacity: usize,
    rooms: RwLock<HashMap<i64, broadcast::Sender<ChatEvent>>>,
}

impl ChatHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, room_id: i64) -> broadcast::Receiver<ChatEvent> {
        if let Some(sender) = self.rooms.read().await.get(&room_id) {
            return sender.subscribe();
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends `event` to the room's current subscribers and returns how many
    /// there were. Channels nobody listens to are dropped.
    pub async fn publish(&self, room_id: i64, event: ChatEvent) -> usize {
        let delivered = match self.rooms.read().await.get(&room_id) {
            Some(sender) => sender.send(event).ok(),
            None => return 0,
        };
        match delivered {
            Some(n) => n,
            None => {
                let mut rooms = self.rooms.write().await;
                if rooms.get(&room_id).is_some_and(|s| s.receiver_count() == 0) {
                    rooms.remove(&room_id);
                    debug!(room_id, "dropped idle chat channel");
                }
                0
            }
        }
    }
}

fn is_participant(room: &ChatRoom, caller: &User) -> bool {
    caller.role.customer_id() == Some(room.customer_id)
        || caller.role.business_id() == Some(room.business_id)
}

/// Loads a room the caller takes part in.
pub async fn room_for_participant(
    store: &dyn Store,
    caller: &User,
    room_id: i64,
) -> Result<ChatRoom, LedgerError> {
    let room = store
        .get_chat_room(room_id)
        .await?
        .ok_or(LedgerError::NotFound("chat room"))?;
    if !is_participant(&room, caller) {
        return Err(LedgerError::forbidden("you are not a participant of this room"));
    }
    Ok(room)
}

/// The room must still be linked to a live relationship and the two users
/// must still hold an accepted connection.
async fn ensure_chat_allowed(store: &dyn Store, room: &ChatRoom) -> Result<(), LedgerError> {
    let Some(relationship_id) = room.relationship_id else {
        return Err(LedgerError::ChatNotAllowed);
    };
    if store.get_relationship(relationship_id).await?.is_none() {
        return Err(LedgerError::ChatNotAllowed);
    }

    let customer = store.find_user_by_customer(room.customer_id).await?;
    let business = store.find_user_by_business(room.business_id).await?;
    let (Some(customer), Some(business)) = (customer, business) else {
        return Err(LedgerError::ChatNotAllowed);
    };
    match store.find_request_between(customer.id, business.id).await? {
        Some(request) if request.status == RequestStatus::Accepted => Ok(()),
        _ => Err(LedgerError::ChatNotAllowed),
    }
}

fn validate_message(message: &OutgoingMessage) -> Result<(), LedgerError> {
    match message.kind {
        MessageKind::Text if message.content.trim().is_empty() => {
            Err(LedgerError::validation("text messages must have content"))
        }
        MessageKind::Image | MessageKind::File if message.file_url.is_none() => Err(
            LedgerError::validation(format!("{} messages need a file_url", message.kind)),
        ),
        MessageKind::System => Err(LedgerError::validation(
            "system messages cannot be sent by users",
        )),
        _ => Ok(()),
    }
}

pub async fn send_message(
    store: &dyn Store,
    hub: &ChatHub,
    caller: &User,
    room_id: i64,
    message: OutgoingMessage,
) -> Result<ChatMessage, LedgerError> {
    let room = room_for_participant(store, caller, room_id).await?;
    validate_message(&message)?;
    ensure_chat_allowed(store, &room).await?;

    let created = store
        .insert_message(NewMessage {
            room_id: room.id,
            sender_id: caller.id,
            kind: message.kind,
            content: message.content,
            file_url: message.file_url,
        })
        .await?;

    let delivered = hub
        .publish(
            room.id,
            ChatEvent::ChatMessage {
                message: created.clone(),
            },
        )
        .await;
    debug!(room_id, message_id = created.id, delivered, "chat message published");
    Ok(created)
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

/// One page of a room's history, oldest first. Readable after the
/// connection is gone.
pub async fn history(
    store: &dyn Store,
    caller: &User,
    room_id: i64,
    page: Option<u32>,
    per_page: Option<u32>,
) -> Result<HistoryPage, LedgerError> {
    let room = room_for_participant(store, caller, room_id).await?;
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = u64::from(page - 1) * u64::from(per_page);

    let (messages, total) = store.list_messages(room.id, per_page, offset).await?;
    Ok(HistoryPage {
        messages,
        page,
        per_page,
        total,
    })
}

/// Marks the other participant's messages read and tells the room.
pub async fn mark_read(
    store: &dyn Store,
    hub: &ChatHub,
    caller: &User,
    room_id: i64,
) -> Result<u64, LedgerError> {
    let room = room_for_participant(store, caller, room_id).await?;
    let count = store.mark_room_read(room.id, caller.id).await?;
    if count > 0 {
        hub.publish(
            room.id,
            ChatEvent::MessagesRead {
                room_id: room.id,
                reader_id: caller.id,
                count,
            },
        )
        .await;
    }
    info!(room_id, reader_id = caller.id, count, "chat room marked read");
    Ok(count)
}

pub async fn publish_typing(hub: &ChatHub, caller: &User, room_id: i64, is_typing: bool) {
    hub.publish(
        room_id,
        ChatEvent::Typing {
            room_id,
            user_id: caller.id,
            is_typing,
        },
    )
    .await;
}

pub async fn list_rooms(store: &dyn Store, caller: &User) -> Result<Vec<ChatRoom>, LedgerError> {
    Ok(store.list_chat_rooms(&caller.role).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> OutgoingMessage {
        OutgoingMessage {
            kind: MessageKind::Text,
            content: content.into(),
            file_url: None,
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let hub = ChatHub::new(8);
        let event = ChatEvent::Typing {
            room_id: 1,
            user_id: 2,
            is_typing: true,
        };
        assert_eq!(hub.publish(1, event).await, 0);
    }

    #[tokio::test]
    async fn subscribers_only_see_their_room() {
        let hub = ChatHub::new(8);
        let mut first = hub.subscribe(1).await;
        let mut second = hub.subscribe(2).await;

        let event = ChatEvent::MessagesRead {
            room_id: 1,
            reader_id: 3,
            count: 2,
        };
        assert_eq!(hub.publish(1, event.clone()).await, 1);
        assert_eq!(first.recv().await.unwrap(), event);
        assert!(second.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscribers_release_the_channel() {
        let hub = ChatHub::new(8);
        drop(hub.subscribe(5).await);
        let event = ChatEvent::Typing {
            room_id: 5,
            user_id: 1,
            is_typing: false,
        };
        assert_eq!(hub.publish(5, event).await, 0);
        assert!(hub.rooms.read().await.is_empty());
    }

    #[test]
    fn blank_text_is_rejected() {
        assert!(validate_message(&text("  ")).is_err());
        assert!(validate_message(&text("hello")).is_ok());
        let image = OutgoingMessage {
            kind: MessageKind::Image,
            content: String::new(),
            file_url: None,
        };
        assert!(validate_message(&image).is_err());
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"chat_message","content":"hi"}"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::ChatMessage { message } if message.content == "hi" && message.kind == MessageKind::Text
        ));
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Typing { is_typing: true }));
    }

    #[test]
    fn events_are_tagged() {
        let value = serde_json::to_value(ChatEvent::Typing {
            room_id: 1,
            user_id: 2,
            is_typing: true,
        })
        .unwrap();
        assert_eq!(value["type"], "typing");
        assert_eq!(value["room_id"], 1);
    }
}
