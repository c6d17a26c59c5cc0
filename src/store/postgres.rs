use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};

use super::{Disconnect, Resolution, Store, StoreError, StoreResult, within_amount_range};
use crate::types::{
    ChatMessage, ChatRoom, ConnectionRequest, EntryTotals, Favorite, LedgerEntry, NewEntry,
    NewMessage, NewNotification, NewProfile, NewUser, Notification, PartyPair, Relationship,
    RequestFilter, RequestStatus, Role, User,
};

const USER_SELECT: &str = r#"SELECT u.id, u.email, u.full_name, u.phone_number, u.device_token, u.created_at,
       c.id AS customer_id, b.id AS business_id, b.business_name
FROM users u
LEFT JOIN customers c ON c.user_id = u.id
LEFT JOIN businesses b ON b.user_id = u.id"#;

const RELATIONSHIP_COLUMNS: &str = "id, customer_id, business_id, pending_due, created_at, updated_at";
const ENTRY_COLUMNS: &str = "id, relationship_id, amount, kind, description, created_at";
const REQUEST_COLUMNS: &str = "id, sender_id, receiver_id, status, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, room_id, sender_id, kind, content, file_url, created_at, read_at";
const NOTIFICATION_COLUMNS: &str =
    "id, sender_id, receiver_id, title, message, kind, is_read, created_at";

const ROOM_SELECT: &str = r#"SELECT r.id, r.customer_id, r.business_id, r.relationship_id, r.created_at,
       (SELECT MAX(m.created_at) FROM chat_messages m WHERE m.room_id = r.id) AS last_message_at
FROM chat_rooms r"#;

const FAVORITE_SELECT: &str = r#"SELECT f.id, f.customer_id, f.business_id, b.business_name, f.created_at
FROM favorites f
JOIN businesses b ON b.id = f.business_id"#;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    full_name: String,
    phone_number: Option<String>,
    device_token: Option<String>,
    created_at: DateTime<Utc>,
    customer_id: Option<i64>,
    business_id: Option<i64>,
    business_name: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = match (row.customer_id, row.business_id, row.business_name) {
            (Some(customer_id), None, _) => Role::Customer { customer_id },
            (None, Some(business_id), Some(business_name)) => Role::Business {
                business_id,
                business_name,
            },
            _ => {
                return Err(StoreError::Backend(anyhow::anyhow!(
                    "user {} does not have exactly one profile",
                    row.id
                )));
            }
        };
        Ok(User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            phone_number: row.phone_number,
            device_token: row.device_token,
            role,
            created_at: row.created_at,
        })
    }
}

// NOTE: 23505 = unique_violation
fn unique_violation(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Duplicate(what);
            }
        }
        StoreError::from(e)
    }
}

/// `ILIKE` pattern matching `query` literally anywhere in the value.
fn contains_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn role_filter(role: &Role) -> (&'static str, i64) {
    match role {
        Role::Customer { customer_id } => ("customer_id", *customer_id),
        Role::Business { business_id, .. } => ("business_id", *business_id),
    }
}

async fn recompute(
    tx: &mut Transaction<'_, Postgres>,
    relationship_id: i64,
) -> Result<Option<Decimal>, sqlx::Error> {
    sqlx::query_scalar::<_, Decimal>(
        r#"UPDATE relationships
           SET pending_due = (SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE relationship_id = $1),
               updated_at = now()
           WHERE id = $1
           RETURNING pending_due"#,
    )
    .bind(relationship_id)
    .fetch_optional(&mut **tx)
    .await
}

async fn upsert_relationship(
    tx: &mut Transaction<'_, Postgres>,
    pair: PartyPair,
) -> Result<(Relationship, bool), sqlx::Error> {
    let inserted = sqlx::query_as::<_, Relationship>(&format!(
        r#"INSERT INTO relationships (customer_id, business_id) VALUES ($1, $2)
           ON CONFLICT (customer_id, business_id) DO NOTHING
           RETURNING {RELATIONSHIP_COLUMNS}"#
    ))
    .bind(pair.customer_id)
    .bind(pair.business_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(rel) = inserted {
        return Ok((rel, true));
    }

    let existing = sqlx::query_as::<_, Relationship>(&format!(
        "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE customer_id = $1 AND business_id = $2"
    ))
    .bind(pair.customer_id)
    .bind(pair.business_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok((existing, false))
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects the pool and applies the embedded migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        Ok(Self::new(pool))
    }

    async fn user_where(&self, clause: &str, id: i64) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{USER_SELECT} WHERE {clause} = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO users (email, full_name, phone_number) VALUES ($1, $2, $3) RETURNING id"#,
        )
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone_number)
        .fetch_one(&mut *tx)
        .await
        .map_err(unique_violation("user with this email or phone number"))?;

        match &user.profile {
            NewProfile::Customer => {
                sqlx::query(r#"INSERT INTO customers (user_id) VALUES ($1)"#)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            NewProfile::Business { business_name } => {
                sqlx::query(r#"INSERT INTO businesses (user_id, business_name) VALUES ($1, $2)"#)
                    .bind(id)
                    .bind(business_name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        self.get_user(id)
            .await?
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("user {id} missing after insert")))
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        self.user_where("u.id", id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "{USER_SELECT} WHERE lower(u.email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_customer(&self, customer_id: i64) -> StoreResult<Option<User>> {
        self.user_where("c.id", customer_id).await
    }

    async fn find_user_by_business(&self, business_id: i64) -> StoreResult<Option<User>> {
        self.user_where("b.id", business_id).await
    }

    async fn search_users(&self, query: &str, exclude: i64, limit: usize) -> StoreResult<Vec<User>> {
        let pattern = contains_pattern(query);
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"{USER_SELECT}
               WHERE u.id <> $1
                 AND (u.email ILIKE $2 ESCAPE '\' OR u.phone_number ILIKE $2 ESCAPE '\')
               ORDER BY u.id
               LIMIT $3"#
        ))
        .bind(exclude)
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn set_device_token(&self, user_id: i64, token: Option<String>) -> StoreResult<()> {
        sqlx::query(r#"UPDATE users SET device_token = $2 WHERE id = $1"#)
            .bind(user_id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_relationship(&self, id: i64) -> StoreResult<Option<Relationship>> {
        Ok(sqlx::query_as::<_, Relationship>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_relationship(&self, pair: PartyPair) -> StoreResult<Option<Relationship>> {
        Ok(sqlx::query_as::<_, Relationship>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE customer_id = $1 AND business_id = $2"
        ))
        .bind(pair.customer_id)
        .bind(pair.business_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_or_create_relationship(
        &self,
        pair: PartyPair,
    ) -> StoreResult<(Relationship, bool)> {
        let mut tx = self.pool.begin().await?;
        let out = upsert_relationship(&mut tx, pair).await?;
        tx.commit().await?;
        Ok(out)
    }

    async fn list_relationships(&self, role: &Role) -> StoreResult<Vec<Relationship>> {
        let (column, id) = role_filter(role);
        Ok(sqlx::query_as::<_, Relationship>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE {column} = $1 ORDER BY id DESC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_all_relationship_ids(&self) -> StoreResult<Vec<i64>> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT id FROM relationships ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn recompute_pending_due(&self, relationship_id: i64) -> StoreResult<Option<Decimal>> {
        let mut tx = self.pool.begin().await?;
        let due = recompute(&mut tx, relationship_id).await?;
        tx.commit().await?;
        Ok(due)
    }

    async fn insert_entry(&self, entry: NewEntry) -> StoreResult<Option<(LedgerEntry, Decimal)>> {
        let mut tx = self.pool.begin().await?;

        // Serialises with concurrent entry writes and disconnects on this row.
        let locked = sqlx::query_scalar::<_, i64>(
            r#"SELECT id FROM relationships WHERE id = $1 FOR UPDATE"#,
        )
        .bind(entry.relationship_id)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Ok(None);
        }

        let current = sqlx::query_scalar::<_, Decimal>(
            r#"SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE relationship_id = $1"#,
        )
        .bind(entry.relationship_id)
        .fetch_one(&mut *tx)
        .await?;
        let mut total = current + entry.amount;
        if !within_amount_range(total) {
            total.rescale(2);
            return Err(StoreError::BalanceOutOfRange(total));
        }

        let created = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"INSERT INTO ledger_entries (relationship_id, amount, kind, description)
               VALUES ($1, $2, $3, $4)
               RETURNING {ENTRY_COLUMNS}"#
        ))
        .bind(entry.relationship_id)
        .bind(entry.amount)
        .bind(entry.kind.as_str())
        .bind(&entry.description)
        .fetch_one(&mut *tx)
        .await?;

        let due = recompute(&mut tx, entry.relationship_id)
            .await?
            .context("relationship vanished during recompute")?;

        tx.commit().await?;
        Ok(Some((created, due)))
    }

    async fn list_entries(&self, relationship_ids: &[i64]) -> StoreResult<Vec<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"SELECT {ENTRY_COLUMNS} FROM ledger_entries
               WHERE relationship_id = ANY($1)
               ORDER BY created_at DESC, id DESC"#
        ))
        .bind(relationship_ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn entry_totals(&self, relationship_ids: &[i64]) -> StoreResult<EntryTotals> {
        let (to_pay, paid) = sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"SELECT COALESCE(SUM(amount) FILTER (WHERE amount > 0), 0),
                      COALESCE(-SUM(amount) FILTER (WHERE amount < 0), 0)
               FROM ledger_entries
               WHERE relationship_id = ANY($1)"#,
        )
        .bind(relationship_ids)
        .fetch_one(&self.pool)
        .await?;
        Ok(EntryTotals { to_pay, paid })
    }

    async fn insert_request(
        &self,
        sender_id: i64,
        receiver_id: i64,
    ) -> StoreResult<ConnectionRequest> {
        sqlx::query_as::<_, ConnectionRequest>(&format!(
            r#"INSERT INTO connection_requests (sender_id, receiver_id) VALUES ($1, $2)
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_violation("connection request"))
    }

    async fn replace_request(
        &self,
        old_id: i64,
        sender_id: i64,
        receiver_id: i64,
    ) -> StoreResult<ConnectionRequest> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"DELETE FROM connection_requests WHERE id = $1"#)
            .bind(old_id)
            .execute(&mut *tx)
            .await?;

        let created = sqlx::query_as::<_, ConnectionRequest>(&format!(
            r#"INSERT INTO connection_requests (sender_id, receiver_id) VALUES ($1, $2)
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(unique_violation("connection request"))?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_request(&self, id: i64) -> StoreResult<Option<ConnectionRequest>> {
        Ok(sqlx::query_as::<_, ConnectionRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM connection_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_request_between(
        &self,
        a: i64,
        b: i64,
    ) -> StoreResult<Option<ConnectionRequest>> {
        Ok(sqlx::query_as::<_, ConnectionRequest>(&format!(
            r#"SELECT {REQUEST_COLUMNS} FROM connection_requests
               WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1)"#
        ))
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_requests(
        &self,
        user_id: i64,
        filter: RequestFilter,
    ) -> StoreResult<Vec<ConnectionRequest>> {
        let clause = match filter {
            RequestFilter::Sent => "sender_id = $1",
            RequestFilter::Received => "receiver_id = $1",
            RequestFilter::PendingReceived => "receiver_id = $1 AND status = 'pending'",
            RequestFilter::Accepted => "(sender_id = $1 OR receiver_id = $1) AND status = 'accepted'",
        };
        Ok(sqlx::query_as::<_, ConnectionRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM connection_requests WHERE {clause} ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_accepted_requests(&self) -> StoreResult<Vec<ConnectionRequest>> {
        Ok(sqlx::query_as::<_, ConnectionRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM connection_requests WHERE status = 'accepted' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn resolve_request(
        &self,
        id: i64,
        status: RequestStatus,
        pair: Option<PartyPair>,
    ) -> StoreResult<Option<Resolution>> {
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, ConnectionRequest>(&format!(
            r#"UPDATE connection_requests SET status = $2, updated_at = now()
               WHERE id = $1 AND status = 'pending'
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(request) = request else {
            return Ok(None);
        };

        let (relationship, relationship_created) = match (status, pair) {
            (RequestStatus::Accepted, Some(pair)) => {
                let (rel, created) = upsert_relationship(&mut tx, pair).await?;
                (Some(rel), created)
            }
            _ => (None, false),
        };

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let status = sqlx::query_scalar::<_, String>(
            r#"SELECT status FROM connection_requests WHERE id = $1 FOR UPDATE"#,
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(status) = status else {
            return Ok(Disconnect::Missing);
        };
        let status: RequestStatus = status.parse().map_err(anyhow::Error::from)?;

        let mut relationship_id = None;
        if let (RequestStatus::Accepted, Some(pair)) = (status, pair) {
            let live = sqlx::query_as::<_, (i64, Decimal)>(
                r#"SELECT id, pending_due FROM relationships
                   WHERE customer_id = $1 AND business_id = $2
                   FOR UPDATE"#,
            )
            .bind(pair.customer_id)
            .bind(pair.business_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((id, pending_due)) = live {
                if !pending_due.is_zero() {
                    return Ok(Disconnect::PendingBalance(pending_due));
                }
                sqlx::query(r#"DELETE FROM relationships WHERE id = $1"#)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                relationship_id = Some(id);
            }
        }

        sqlx::query(r#"DELETE FROM connection_requests WHERE id = $1"#)
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Disconnect::Removed { relationship_id })
    }

    async fn ensure_chat_room(
        &self,
        pair: PartyPair,
        relationship_id: i64,
    ) -> StoreResult<ChatRoom> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO chat_rooms (customer_id, business_id, relationship_id) VALUES ($1, $2, $3)
               ON CONFLICT (customer_id, business_id)
               DO UPDATE SET relationship_id = EXCLUDED.relationship_id
               RETURNING id"#,
        )
        .bind(pair.customer_id)
        .bind(pair.business_id)
        .bind(relationship_id)
        .fetch_one(&self.pool)
        .await?;

        self.get_chat_room(id)
            .await?
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("chat room {id} missing after upsert")))
    }

    async fn get_chat_room(&self, id: i64) -> StoreResult<Option<ChatRoom>> {
        Ok(
            sqlx::query_as::<_, ChatRoom>(&format!("{ROOM_SELECT} WHERE r.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_chat_rooms(&self, role: &Role) -> StoreResult<Vec<ChatRoom>> {
        let (column, id) = role_filter(role);
        Ok(sqlx::query_as::<_, ChatRoom>(&format!(
            "{ROOM_SELECT} WHERE r.{column} = $1 ORDER BY last_message_at DESC NULLS LAST, id DESC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<ChatMessage> {
        Ok(sqlx::query_as::<_, ChatMessage>(&format!(
            r#"INSERT INTO chat_messages (room_id, sender_id, kind, content, file_url)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {MESSAGE_COLUMNS}"#
        ))
        .bind(message.room_id)
        .bind(message.sender_id)
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(&message.file_url)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_messages(
        &self,
        room_id: i64,
        limit: u32,
        offset: u64,
    ) -> StoreResult<(Vec<ChatMessage>, u64)> {
        let total: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM chat_messages WHERE room_id = $1"#)
                .bind(room_id)
                .fetch_one(&self.pool)
                .await?;

        let page = sqlx::query_as::<_, ChatMessage>(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM chat_messages
               WHERE room_id = $1
               ORDER BY created_at, id
               LIMIT $2 OFFSET $3"#
        ))
        .bind(room_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok((page, total as u64))
    }

    async fn mark_room_read(&self, room_id: i64, reader_id: i64) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"UPDATE chat_messages SET read_at = now()
               WHERE room_id = $1 AND sender_id <> $2 AND read_at IS NULL"#,
        )
        .bind(room_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        Ok(sqlx::query_as::<_, Notification>(&format!(
            r#"INSERT INTO notifications (sender_id, receiver_id, title, message, kind)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(notification.sender_id)
        .bind(notification.receiver_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_notifications(
        &self,
        receiver_id: i64,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        Ok(sqlx::query_as::<_, Notification>(&format!(
            r#"SELECT {NOTIFICATION_COLUMNS} FROM notifications
               WHERE receiver_id = $1 AND (NOT $2 OR NOT is_read)
               ORDER BY created_at DESC, id DESC"#
        ))
        .bind(receiver_id)
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn unread_count(&self, receiver_id: i64) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM notifications WHERE receiver_id = $1 AND NOT is_read"#,
        )
        .bind(receiver_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn mark_notification_read(
        &self,
        id: i64,
        receiver_id: i64,
    ) -> StoreResult<Option<Notification>> {
        Ok(sqlx::query_as::<_, Notification>(&format!(
            r#"UPDATE notifications SET is_read = TRUE
               WHERE id = $1 AND receiver_id = $2
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(id)
        .bind(receiver_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn mark_all_read(&self, receiver_id: i64) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"UPDATE notifications SET is_read = TRUE WHERE receiver_id = $1 AND NOT is_read"#,
        )
        .bind(receiver_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn insert_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<Favorite> {
        sqlx::query_as::<_, Favorite>(
            r#"WITH f AS (
                   INSERT INTO favorites (customer_id, business_id) VALUES ($1, $2)
                   RETURNING id, customer_id, business_id, created_at
               )
               SELECT f.id, f.customer_id, f.business_id, b.business_name, f.created_at
               FROM f JOIN businesses b ON b.id = f.business_id"#,
        )
        .bind(customer_id)
        .bind(business_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unique_violation("favorite"))
    }

    async fn delete_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<bool> {
        let res =
            sqlx::query(r#"DELETE FROM favorites WHERE customer_id = $1 AND business_id = $2"#)
                .bind(customer_id)
                .bind(business_id)
                .execute(&self.pool)
                .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_favorites(&self, customer_id: i64) -> StoreResult<Vec<Favorite>> {
        Ok(sqlx::query_as::<_, Favorite>(&format!(
            "{FAVORITE_SELECT} WHERE f.customer_id = $1 ORDER BY f.created_at DESC, f.id DESC"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn is_favorite(&self, customer_id: i64, business_id: i64) -> StoreResult<bool> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM favorites WHERE customer_id = $1 AND business_id = $2)"#,
        )
        .bind(customer_id)
        .bind(business_id)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_wildcards_are_matched_literally() {
        assert_eq!(contains_pattern("sita"), "%sita%");
        assert_eq!(contains_pattern("_"), r"%\_%");
        assert_eq!(contains_pattern("50%"), r"%50\%%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }
}
