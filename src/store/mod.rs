//! Persistence seam. `PgStore` is the production backend, `MemoryStore` keeps
//! everything in process for tests and local runs.
//!
//! Compound writes (entry + recompute, accept + relationship, guarded
//! disconnect) are single trait methods so each backend can make them atomic.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    ChatMessage, ChatRoom, ConnectionRequest, EntryTotals, Favorite, LedgerEntry, NewEntry,
    NewMessage, NewNotification, NewUser, Notification, PartyPair, Relationship, RequestFilter,
    RequestStatus, Role, User,
};

/// Amounts and balances are NUMERIC(12,2), so the integral part has at most
/// ten digits.
pub const MAX_AMOUNT_UNITS: i64 = 10_000_000_000;

pub fn within_amount_range(value: Decimal) -> bool {
    value.abs() < Decimal::from(MAX_AMOUNT_UNITS)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(&'static str),
    /// The entry would push the relationship balance past the column range.
    #[error("resulting balance of {0} is out of range")]
    BalanceOutOfRange(Decimal),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of moving a request out of `pending`.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub request: ConnectionRequest,
    /// Set when the request was accepted and a pair could be derived.
    pub relationship: Option<Relationship>,
    /// True when the relationship did not exist before this call.
    pub relationship_created: bool,
}

/// Outcome of a guarded connection removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    Removed { relationship_id: Option<i64> },
    PendingBalance(Decimal),
    Missing,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the user and its single profile.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn get_user(&self, id: i64) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_customer(&self, customer_id: i64) -> StoreResult<Option<User>>;
    async fn find_user_by_business(&self, business_id: i64) -> StoreResult<Option<User>>;
    /// Case-insensitive substring match on e-mail or phone number.
    async fn search_users(&self, query: &str, exclude: i64, limit: usize) -> StoreResult<Vec<User>>;
    async fn set_device_token(&self, user_id: i64, token: Option<String>) -> StoreResult<()>;

    async fn get_relationship(&self, id: i64) -> StoreResult<Option<Relationship>>;
    async fn find_relationship(&self, pair: PartyPair) -> StoreResult<Option<Relationship>>;
    async fn get_or_create_relationship(&self, pair: PartyPair)
    -> StoreResult<(Relationship, bool)>;
    async fn list_relationships(&self, role: &Role) -> StoreResult<Vec<Relationship>>;
    async fn list_all_relationship_ids(&self) -> StoreResult<Vec<i64>>;
    /// Re-derives `pending_due` from the entry history. `None` if the
    /// relationship is gone.
    async fn recompute_pending_due(&self, relationship_id: i64) -> StoreResult<Option<Decimal>>;

    /// Appends the entry and recomputes the owning balance atomically.
    /// `None` if the relationship is gone.
    async fn insert_entry(&self, entry: NewEntry) -> StoreResult<Option<(LedgerEntry, Decimal)>>;
    /// Entries of the given relationships, newest first.
    async fn list_entries(&self, relationship_ids: &[i64]) -> StoreResult<Vec<LedgerEntry>>;
    async fn entry_totals(&self, relationship_ids: &[i64]) -> StoreResult<EntryTotals>;

    async fn insert_request(&self, sender_id: i64, receiver_id: i64)
    -> StoreResult<ConnectionRequest>;
    /// Drops `old_id` and creates a fresh pending request in one step.
    async fn replace_request(
        &self,
        old_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> StoreResult<ConnectionRequest>;
    async fn get_request(&self, id: i64) -> StoreResult<Option<ConnectionRequest>>;
    /// The request between two users, whichever of them sent it.
    async fn find_request_between(&self, a: i64, b: i64)
    -> StoreResult<Option<ConnectionRequest>>;
    async fn list_requests(
        &self,
        user_id: i64,
        filter: RequestFilter,
    ) -> StoreResult<Vec<ConnectionRequest>>;
    async fn list_accepted_requests(&self) -> StoreResult<Vec<ConnectionRequest>>;
    /// Moves a pending request to `status`, creating the relationship for
    /// `pair` on acceptance. `None` when the request is missing or no longer
    /// pending.
    async fn resolve_request(
        &self,
        id: i64,
        status: RequestStatus,
        pair: Option<PartyPair>,
    ) -> StoreResult<Option<Resolution>>;
    /// Deletes the request and, for `pair`, its relationship, unless the
    /// relationship still carries a balance.
    async fn disconnect(&self, request_id: i64, pair: Option<PartyPair>)
    -> StoreResult<Disconnect>;

    /// Get-or-create the pair's room and link it to `relationship_id`.
    async fn ensure_chat_room(&self, pair: PartyPair, relationship_id: i64)
    -> StoreResult<ChatRoom>;
    async fn get_chat_room(&self, id: i64) -> StoreResult<Option<ChatRoom>>;
    /// Rooms of `role`, most recently active first.
    async fn list_chat_rooms(&self, role: &Role) -> StoreResult<Vec<ChatRoom>>;
    async fn insert_message(&self, message: NewMessage) -> StoreResult<ChatMessage>;
    /// One page of history, oldest first, and the total message count.
    async fn list_messages(
        &self,
        room_id: i64,
        limit: u32,
        offset: u64,
    ) -> StoreResult<(Vec<ChatMessage>, u64)>;
    /// Marks messages not sent by `reader_id` as read. Returns how many changed.
    async fn mark_room_read(&self, room_id: i64, reader_id: i64) -> StoreResult<u64>;

    async fn insert_notification(&self, notification: NewNotification)
    -> StoreResult<Notification>;
    async fn list_notifications(
        &self,
        receiver_id: i64,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>>;
    async fn unread_count(&self, receiver_id: i64) -> StoreResult<u64>;
    async fn mark_notification_read(
        &self,
        id: i64,
        receiver_id: i64,
    ) -> StoreResult<Option<Notification>>;
    async fn mark_all_read(&self, receiver_id: i64) -> StoreResult<u64>;

    async fn insert_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<Favorite>;
    async fn delete_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<bool>;
    async fn list_favorites(&self, customer_id: i64) -> StoreResult<Vec<Favorite>>;
    async fn is_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<bool>;
}
