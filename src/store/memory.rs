//! In-process store. One lock guards all tables, so every trait method is
//! atomic with respect to the others.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{Disconnect, Resolution, Store, StoreError, StoreResult, within_amount_range};
use crate::types::{
    ChatMessage, ChatRoom, ConnectionRequest, EntryTotals, Favorite, LedgerEntry, NewEntry,
    NewMessage, NewNotification, NewProfile, NewUser, Notification, PartyPair, Relationship,
    RequestFilter, RequestStatus, Role, User,
};

#[derive(Clone)]
struct FavoriteRow {
    id: i64,
    customer_id: i64,
    business_id: i64,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    last_id: i64,
    users: BTreeMap<i64, User>,
    relationships: BTreeMap<i64, Relationship>,
    entries: Vec<LedgerEntry>,
    requests: BTreeMap<i64, ConnectionRequest>,
    rooms: BTreeMap<i64, ChatRoom>,
    messages: Vec<ChatMessage>,
    notifications: BTreeMap<i64, Notification>,
    favorites: Vec<FavoriteRow>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn user_where(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users.values().find(|u| pred(*u)).cloned()
    }

    fn relationship_for(&self, pair: PartyPair) -> Option<&Relationship> {
        self.relationships.values().find(|r| r.pair() == pair)
    }

    fn recompute(&mut self, relationship_id: i64) -> Option<Decimal> {
        let mut due: Decimal = self
            .entries
            .iter()
            .filter(|e| e.relationship_id == relationship_id)
            .map(|e| e.amount)
            .sum();
        due.rescale(2);
        let rel = self.relationships.get_mut(&relationship_id)?;
        rel.pending_due = due;
        rel.updated_at = Utc::now();
        Some(due)
    }

    fn delete_relationship(&mut self, relationship_id: i64) {
        self.relationships.remove(&relationship_id);
        self.entries.retain(|e| e.relationship_id != relationship_id);
        for room in self.rooms.values_mut() {
            if room.relationship_id == Some(relationship_id) {
                room.relationship_id = None;
            }
        }
    }

    fn room_view(&self, room: &ChatRoom) -> ChatRoom {
        let mut view = room.clone();
        view.last_message_at = self
            .messages
            .iter()
            .filter(|m| m.room_id == room.id)
            .map(|m| m.created_at)
            .max();
        view
    }

    fn new_request(&mut self, sender_id: i64, receiver_id: i64) -> ConnectionRequest {
        let now = Utc::now();
        let request = ConnectionRequest {
            id: self.next_id(),
            sender_id,
            receiver_id,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.requests.insert(request.id, request.clone());
        request
    }

    fn request_between(&self, a: i64, b: i64) -> Option<&ConnectionRequest> {
        self.requests.values().find(|r| {
            (r.sender_id == a && r.receiver_id == b) || (r.sender_id == b && r.receiver_id == a)
        })
    }

    fn favorite_view(&self, row: &FavoriteRow) -> Favorite {
        let business_name = self
            .users
            .values()
            .find_map(|u| match &u.role {
                Role::Business {
                    business_id,
                    business_name,
                } if *business_id == row.business_id => Some(business_name.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Favorite {
            id: row.id,
            customer_id: row.customer_id,
            business_id: row.business_id,
            business_name,
            created_at: row.created_at,
        }
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> i64) {
    items.sort_by_key(|item| Reverse(key(item)));
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("user with this email"));
        }
        if user.phone_number.is_some()
            && t.users.values().any(|u| u.phone_number == user.phone_number)
        {
            return Err(StoreError::Duplicate("user with this phone number"));
        }
        let id = t.next_id();
        let profile_id = t.next_id();
        let role = match user.profile {
            NewProfile::Customer => Role::Customer {
                customer_id: profile_id,
            },
            NewProfile::Business { business_name } => Role::Business {
                business_id: profile_id,
                business_name,
            },
        };
        let created = User {
            id,
            email: user.email,
            full_name: user.full_name,
            phone_number: user.phone_number,
            device_token: None,
            role,
            created_at: Utc::now(),
        };
        t.users.insert(id, created.clone());
        Ok(created)
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .tables
            .read()
            .await
            .user_where(|u| u.email.to_lowercase() == email))
    }

    async fn find_user_by_customer(&self, customer_id: i64) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .user_where(|u| u.role.customer_id() == Some(customer_id)))
    }

    async fn find_user_by_business(&self, business_id: i64) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .user_where(|u| u.role.business_id() == Some(business_id)))
    }

    async fn search_users(&self, query: &str, exclude: i64, limit: usize) -> StoreResult<Vec<User>> {
        let needle = query.to_lowercase();
        let t = self.tables.read().await;
        Ok(t.users
            .values()
            .filter(|u| u.id != exclude)
            .filter(|u| {
                u.email.to_lowercase().contains(&needle)
                    || u.phone_number
                        .as_deref()
                        .is_some_and(|p| p.to_lowercase().contains(&needle))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_device_token(&self, user_id: i64, token: Option<String>) -> StoreResult<()> {
        if let Some(user) = self.tables.write().await.users.get_mut(&user_id) {
            user.device_token = token;
        }
        Ok(())
    }

    async fn get_relationship(&self, id: i64) -> StoreResult<Option<Relationship>> {
        Ok(self.tables.read().await.relationships.get(&id).cloned())
    }

    async fn find_relationship(&self, pair: PartyPair) -> StoreResult<Option<Relationship>> {
        Ok(self.tables.read().await.relationship_for(pair).cloned())
    }

    async fn get_or_create_relationship(
        &self,
        pair: PartyPair,
    ) -> StoreResult<(Relationship, bool)> {
        let mut t = self.tables.write().await;
        if let Some(existing) = t.relationship_for(pair) {
            return Ok((existing.clone(), false));
        }
        let now = Utc::now();
        let rel = Relationship {
            id: t.next_id(),
            customer_id: pair.customer_id,
            business_id: pair.business_id,
            pending_due: Decimal::new(0, 2),
            created_at: now,
            updated_at: now,
        };
        t.relationships.insert(rel.id, rel.clone());
        Ok((rel, true))
    }

    async fn list_relationships(&self, role: &Role) -> StoreResult<Vec<Relationship>> {
        let t = self.tables.read().await;
        let mut rels: Vec<Relationship> = t
            .relationships
            .values()
            .filter(|r| r.side_of(role).is_some())
            .cloned()
            .collect();
        newest_first(&mut rels, |r| r.id);
        Ok(rels)
    }

    async fn list_all_relationship_ids(&self) -> StoreResult<Vec<i64>> {
        Ok(self.tables.read().await.relationships.keys().copied().collect())
    }

    async fn recompute_pending_due(&self, relationship_id: i64) -> StoreResult<Option<Decimal>> {
        Ok(self.tables.write().await.recompute(relationship_id))
    }

    async fn insert_entry(&self, entry: NewEntry) -> StoreResult<Option<(LedgerEntry, Decimal)>> {
        let mut t = self.tables.write().await;
        if !t.relationships.contains_key(&entry.relationship_id) {
            return Ok(None);
        }
        let mut total: Decimal = t
            .entries
            .iter()
            .filter(|e| e.relationship_id == entry.relationship_id)
            .map(|e| e.amount)
            .sum::<Decimal>()
            + entry.amount;
        if !within_amount_range(total) {
            total.rescale(2);
            return Err(StoreError::BalanceOutOfRange(total));
        }
        let created = LedgerEntry {
            id: t.next_id(),
            relationship_id: entry.relationship_id,
            amount: entry.amount,
            kind: entry.kind,
            description: entry.description,
            created_at: Utc::now(),
        };
        t.entries.push(created.clone());
        let due = t.recompute(entry.relationship_id).unwrap_or_default();
        Ok(Some((created, due)))
    }

    async fn list_entries(&self, relationship_ids: &[i64]) -> StoreResult<Vec<LedgerEntry>> {
        let t = self.tables.read().await;
        let mut entries: Vec<LedgerEntry> = t
            .entries
            .iter()
            .filter(|e| relationship_ids.contains(&e.relationship_id))
            .cloned()
            .collect();
        newest_first(&mut entries, |e| e.id);
        Ok(entries)
    }

    async fn entry_totals(&self, relationship_ids: &[i64]) -> StoreResult<EntryTotals> {
        let t = self.tables.read().await;
        let mut totals = EntryTotals::default();
        for e in t
            .entries
            .iter()
            .filter(|e| relationship_ids.contains(&e.relationship_id))
        {
            if e.amount.is_sign_positive() {
                totals.to_pay += e.amount;
            } else {
                totals.paid += e.amount.abs();
            }
        }
        Ok(totals)
    }

    async fn insert_request(
        &self,
        sender_id: i64,
        receiver_id: i64,
    ) -> StoreResult<ConnectionRequest> {
        let mut t = self.tables.write().await;
        if t.request_between(sender_id, receiver_id).is_some() {
            return Err(StoreError::Duplicate("connection request"));
        }
        Ok(t.new_request(sender_id, receiver_id))
    }

    async fn replace_request(
        &self,
        old_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> StoreResult<ConnectionRequest> {
        let mut t = self.tables.write().await;
        t.requests.remove(&old_id);
        if t.request_between(sender_id, receiver_id).is_some() {
            return Err(StoreError::Duplicate("connection request"));
        }
        Ok(t.new_request(sender_id, receiver_id))
    }

    async fn get_request(&self, id: i64) -> StoreResult<Option<ConnectionRequest>> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn find_request_between(
        &self,
        a: i64,
        b: i64,
    ) -> StoreResult<Option<ConnectionRequest>> {
        Ok(self.tables.read().await.request_between(a, b).cloned())
    }

    async fn list_requests(
        &self,
        user_id: i64,
        filter: RequestFilter,
    ) -> StoreResult<Vec<ConnectionRequest>> {
        let t = self.tables.read().await;
        let mut requests: Vec<ConnectionRequest> = t
            .requests
            .values()
            .filter(|r| match filter {
                RequestFilter::Sent => r.sender_id == user_id,
                RequestFilter::Received => r.receiver_id == user_id,
                RequestFilter::PendingReceived => {
                    r.receiver_id == user_id && r.status == RequestStatus::Pending
                }
                RequestFilter::Accepted => {
                    r.counterpart(user_id).is_some() && r.status == RequestStatus::Accepted
                }
            })
            .cloned()
            .collect();
        newest_first(&mut requests, |r| r.id);
        Ok(requests)
    }

    async fn list_accepted_requests(&self) -> StoreResult<Vec<ConnectionRequest>> {
        let t = self.tables.read().await;
        Ok(t.requests
            .values()
            .filter(|r| r.status == RequestStatus::Accepted)
            .cloned()
            .collect())
    }

    async fn resolve_request(
        &self,
        id: i64,
        status: RequestStatus,
        pair: Option<PartyPair>,
    ) -> StoreResult<Option<Resolution>> {
        let mut t = self.tables.write().await;
        let request = match t.requests.get_mut(&id) {
            Some(r) if r.status == RequestStatus::Pending => {
                r.status = status;
                r.updated_at = Utc::now();
                r.clone()
            }
            _ => return Ok(None),
        };

        let mut relationship = None;
        let mut relationship_created = false;
        if let (RequestStatus::Accepted, Some(pair)) = (status, pair) {
            match t.relationship_for(pair).cloned() {
                Some(existing) => relationship = Some(existing),
                None => {
                    let now = Utc::now();
                    let rel = Relationship {
                        id: t.next_id(),
                        customer_id: pair.customer_id,
                        business_id: pair.business_id,
                        pending_due: Decimal::new(0, 2),
                        created_at: now,
                        updated_at: now,
                    };
                    t.relationships.insert(rel.id, rel.clone());
                    relationship = Some(rel);
                    relationship_created = true;
                }
            }
        }

        Ok(Some(Resolution {
            request,
            relationship,
            relationship_created,
        }))
    }

    async fn disconnect(
        &self,
        request_id: i64,
        pair: Option<PartyPair>,
    ) -> StoreResult<Disconnect> {
        let mut t = self.tables.write().await;
        let Some(request) = t.requests.get(&request_id).cloned() else {
            return Ok(Disconnect::Missing);
        };

        let mut relationship_id = None;
        if let (RequestStatus::Accepted, Some(pair)) = (request.status, pair) {
            if let Some(rel) = t.relationship_for(pair).cloned() {
                if !rel.pending_due.is_zero() {
                    return Ok(Disconnect::PendingBalance(rel.pending_due));
                }
                t.delete_relationship(rel.id);
                relationship_id = Some(rel.id);
            }
        }
        t.requests.remove(&request_id);
        Ok(Disconnect::Removed { relationship_id })
    }

    async fn ensure_chat_room(
        &self,
        pair: PartyPair,
        relationship_id: i64,
    ) -> StoreResult<ChatRoom> {
        let mut t = self.tables.write().await;
        let existing = t.rooms.values().find(|r| r.pair() == pair).map(|r| r.id);
        let room_id = match existing {
            Some(id) => id,
            None => {
                let id = t.next_id();
                let room = ChatRoom {
                    id,
                    customer_id: pair.customer_id,
                    business_id: pair.business_id,
                    relationship_id: None,
                    created_at: Utc::now(),
                    last_message_at: None,
                };
                t.rooms.insert(id, room);
                id
            }
        };
        let Some(room) = t.rooms.get_mut(&room_id) else {
            return Err(StoreError::Backend(anyhow::anyhow!("chat room {room_id} vanished")));
        };
        room.relationship_id = Some(relationship_id);
        let room = room.clone();
        Ok(t.room_view(&room))
    }

    async fn get_chat_room(&self, id: i64) -> StoreResult<Option<ChatRoom>> {
        let t = self.tables.read().await;
        Ok(t.rooms.get(&id).map(|r| t.room_view(r)))
    }

    async fn list_chat_rooms(&self, role: &Role) -> StoreResult<Vec<ChatRoom>> {
        let t = self.tables.read().await;
        let mut rooms: Vec<ChatRoom> = t
            .rooms
            .values()
            .filter(|r| match role {
                Role::Customer { customer_id } => r.customer_id == *customer_id,
                Role::Business { business_id, .. } => r.business_id == *business_id,
            })
            .map(|r| t.room_view(r))
            .collect();
        rooms.sort_by_key(|r| Reverse((r.last_message_at, r.id)));
        Ok(rooms)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<ChatMessage> {
        let mut t = self.tables.write().await;
        let created = ChatMessage {
            id: t.next_id(),
            room_id: message.room_id,
            sender_id: message.sender_id,
            kind: message.kind,
            content: message.content,
            file_url: message.file_url,
            created_at: Utc::now(),
            read_at: None,
        };
        t.messages.push(created.clone());
        Ok(created)
    }

    async fn list_messages(
        &self,
        room_id: i64,
        limit: u32,
        offset: u64,
    ) -> StoreResult<(Vec<ChatMessage>, u64)> {
        let t = self.tables.read().await;
        let in_room: Vec<&ChatMessage> = t.messages.iter().filter(|m| m.room_id == room_id).collect();
        let total = in_room.len() as u64;
        let page = in_room
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn mark_room_read(&self, room_id: i64, reader_id: i64) -> StoreResult<u64> {
        let mut t = self.tables.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for m in t
            .messages
            .iter_mut()
            .filter(|m| m.room_id == room_id && m.sender_id != reader_id && m.read_at.is_none())
        {
            m.read_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        let mut t = self.tables.write().await;
        let created = Notification {
            id: t.next_id(),
            sender_id: notification.sender_id,
            receiver_id: notification.receiver_id,
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            is_read: false,
            created_at: Utc::now(),
        };
        t.notifications.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_notifications(
        &self,
        receiver_id: i64,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        let t = self.tables.read().await;
        let mut found: Vec<Notification> = t
            .notifications
            .values()
            .filter(|n| n.receiver_id == receiver_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        newest_first(&mut found, |n| n.id);
        Ok(found)
    }

    async fn unread_count(&self, receiver_id: i64) -> StoreResult<u64> {
        let t = self.tables.read().await;
        Ok(t.notifications
            .values()
            .filter(|n| n.receiver_id == receiver_id && !n.is_read)
            .count() as u64)
    }

    async fn mark_notification_read(
        &self,
        id: i64,
        receiver_id: i64,
    ) -> StoreResult<Option<Notification>> {
        let mut t = self.tables.write().await;
        Ok(t.notifications
            .get_mut(&id)
            .filter(|n| n.receiver_id == receiver_id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            }))
    }

    async fn mark_all_read(&self, receiver_id: i64) -> StoreResult<u64> {
        let mut t = self.tables.write().await;
        let mut changed = 0;
        for n in t
            .notifications
            .values_mut()
            .filter(|n| n.receiver_id == receiver_id && !n.is_read)
        {
            n.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<Favorite> {
        let mut t = self.tables.write().await;
        if t.favorites
            .iter()
            .any(|f| f.customer_id == customer_id && f.business_id == business_id)
        {
            return Err(StoreError::Duplicate("favorite"));
        }
        let row = FavoriteRow {
            id: t.next_id(),
            customer_id,
            business_id,
            created_at: Utc::now(),
        };
        t.favorites.push(row.clone());
        Ok(t.favorite_view(&row))
    }

    async fn delete_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        let before = t.favorites.len();
        t.favorites
            .retain(|f| !(f.customer_id == customer_id && f.business_id == business_id));
        Ok(t.favorites.len() != before)
    }

    async fn list_favorites(&self, customer_id: i64) -> StoreResult<Vec<Favorite>> {
        let t = self.tables.read().await;
        let mut found: Vec<Favorite> = t
            .favorites
            .iter()
            .filter(|f| f.customer_id == customer_id)
            .map(|f| t.favorite_view(f))
            .collect();
        newest_first(&mut found, |f| f.id);
        Ok(found)
    }

    async fn is_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<bool> {
        let t = self.tables.read().await;
        Ok(t.favorites
            .iter()
            .any(|f| f.customer_id == customer_id && f.business_id == business_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;
    use rust_decimal_macros::dec;

    fn pair() -> PartyPair {
        PartyPair {
            customer_id: 10,
            business_id: 20,
        }
    }

    fn entry(relationship_id: i64, amount: Decimal, kind: EntryKind) -> NewEntry {
        NewEntry {
            relationship_id,
            amount,
            kind,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn relationship_is_created_once_per_pair() {
        let store = MemoryStore::new();
        let (first, created) = store.get_or_create_relationship(pair()).await.unwrap();
        assert!(created);
        let (again, created) = store.get_or_create_relationship(pair()).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, again.id);
    }

    #[tokio::test]
    async fn entry_insert_recomputes_due() {
        let store = MemoryStore::new();
        let (rel, _) = store.get_or_create_relationship(pair()).await.unwrap();
        store
            .insert_entry(entry(rel.id, dec!(100), EntryKind::Purchase))
            .await
            .unwrap();
        let (_, due) = store
            .insert_entry(entry(rel.id, dec!(-40), EntryKind::Payment))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due, dec!(60.00));
        assert_eq!(due.to_string(), "60.00");
    }

    #[tokio::test]
    async fn entry_that_overflows_the_balance_is_not_written() {
        let store = MemoryStore::new();
        let (rel, _) = store.get_or_create_relationship(pair()).await.unwrap();
        store
            .insert_entry(entry(rel.id, dec!(6000000000), EntryKind::Purchase))
            .await
            .unwrap();
        let err = store
            .insert_entry(entry(rel.id, dec!(6000000000), EntryKind::Purchase))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::BalanceOutOfRange(total) if total == dec!(12000000000.00))
        );
        assert_eq!(store.list_entries(&[rel.id]).await.unwrap().len(), 1);
        let kept = store.get_relationship(rel.id).await.unwrap().unwrap();
        assert_eq!(kept.pending_due, dec!(6000000000.00));
    }

    #[tokio::test]
    async fn entry_for_missing_relationship_is_not_written() {
        let store = MemoryStore::new();
        let res = store
            .insert_entry(entry(999, dec!(5), EntryKind::Purchase))
            .await
            .unwrap();
        assert!(res.is_none());
        assert!(store.list_entries(&[999]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_relationship_unlinks_room_but_keeps_it() {
        let store = MemoryStore::new();
        let req = store.insert_request(1, 2).await.unwrap();
        let res = store
            .resolve_request(req.id, RequestStatus::Accepted, Some(pair()))
            .await
            .unwrap()
            .unwrap();
        let rel = res.relationship.unwrap();
        let room = store.ensure_chat_room(pair(), rel.id).await.unwrap();

        let outcome = store.disconnect(req.id, Some(pair())).await.unwrap();
        assert_eq!(
            outcome,
            Disconnect::Removed {
                relationship_id: Some(rel.id)
            }
        );
        let kept = store.get_chat_room(room.id).await.unwrap().unwrap();
        assert_eq!(kept.relationship_id, None);
    }

    #[tokio::test]
    async fn resolve_only_moves_pending_requests() {
        let store = MemoryStore::new();
        let req = store.insert_request(1, 2).await.unwrap();
        assert!(
            store
                .resolve_request(req.id, RequestStatus::Rejected, None)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .resolve_request(req.id, RequestStatus::Accepted, Some(pair()))
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.find_relationship(pair()).await.unwrap().is_none());
    }
}
