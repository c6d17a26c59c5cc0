//! Connection requests between users and the relationships they unlock.
//!
//! A request moves `pending -> accepted | rejected` exactly once. Acceptance
//! between a customer and a business gets-or-creates their relationship and
//! provisions the pair's chat room.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::notify::Notifier;
use crate::store::{Disconnect, Store, StoreError};
use crate::users::normalize_email;
use crate::types::{
    ConnectionRequest, NotificationKind, Relationship, RequestFilter, RequestStatus, User,
    resolve_parties,
};

/// Who a new request is addressed to.
#[derive(Debug, Clone)]
pub enum Recipient {
    Id(i64),
    Email(String),
}

/// A request together with the other user involved.
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: ConnectionRequest,
    pub counterpart: Option<User>,
}

/// An accepted connection from one user's point of view.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub request_id: i64,
    pub user: User,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub relationship_id: Option<i64>,
}

/// Result of a status update.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub request: ConnectionRequest,
    pub relationship: Option<Relationship>,
    pub chat_room_id: Option<i64>,
}

async fn load_user(store: &dyn Store, id: i64) -> Result<User, LedgerError> {
    store.get_user(id).await?.ok_or(LedgerError::NotFound("user"))
}

pub async fn send_request(
    store: &dyn Store,
    notifier: &Notifier,
    sender: &User,
    recipient: Recipient,
) -> Result<ConnectionRequest, LedgerError> {
    let receiver = match recipient {
        Recipient::Id(id) => store.get_user(id).await?,
        Recipient::Email(email) => store.find_user_by_email(&normalize_email(&email)).await?,
    }
    .ok_or(LedgerError::NotFound("user"))?;

    if receiver.id == sender.id {
        return Err(LedgerError::validation(
            "cannot send a connection request to yourself",
        ));
    }

    let request = match store.find_request_between(sender.id, receiver.id).await? {
        None => match store.insert_request(sender.id, receiver.id).await {
            Ok(request) => request,
            // A concurrent send for the same pair won the unique index.
            Err(StoreError::Duplicate(_)) => {
                let request_id = store
                    .find_request_between(sender.id, receiver.id)
                    .await?
                    .map(|r| r.id)
                    .unwrap_or_default();
                return Err(LedgerError::DuplicateRequest { request_id });
            }
            Err(e) => return Err(e.into()),
        },
        Some(existing) => match existing.status {
            RequestStatus::Pending => {
                return Err(LedgerError::DuplicateRequest {
                    request_id: existing.id,
                });
            }
            RequestStatus::Rejected => {
                store
                    .replace_request(existing.id, sender.id, receiver.id)
                    .await?
            }
            RequestStatus::Accepted => {
                let relationship = match resolve_parties(&sender.role, &receiver.role) {
                    Some(pair) => store.find_relationship(pair).await?,
                    None => None,
                };
                match relationship {
                    Some(rel) if !rel.pending_due.is_zero() => {
                        return Err(LedgerError::PendingBalance {
                            pending_due: rel.pending_due,
                        });
                    }
                    Some(_) => {
                        return Err(LedgerError::AlreadyConnected {
                            request_id: existing.id,
                        });
                    }
                    None => {
                        store
                            .replace_request(existing.id, sender.id, receiver.id)
                            .await?
                    }
                }
            }
        },
    };

    info!(
        request_id = request.id,
        sender_id = sender.id,
        receiver_id = receiver.id,
        "connection request sent"
    );
    notifier
        .notify_after_commit(sender, &receiver, NotificationKind::ConnectionRequest)
        .await;
    Ok(request)
}

/// Accepts or rejects a pending request. Only its receiver may do this.
pub async fn update_status(
    store: &dyn Store,
    notifier: &Notifier,
    caller: &User,
    request_id: i64,
    status: RequestStatus,
) -> Result<StatusChange, LedgerError> {
    if status == RequestStatus::Pending {
        return Err(LedgerError::validation(
            "status must be accepted or rejected",
        ));
    }

    let request = store
        .get_request(request_id)
        .await?
        .ok_or(LedgerError::NotFound("connection request"))?;
    if request.receiver_id != caller.id {
        return Err(LedgerError::forbidden(
            "only the receiver can update this request",
        ));
    }
    if request.status != RequestStatus::Pending {
        return Err(LedgerError::InvalidTransition {
            status: request.status,
        });
    }

    let sender = load_user(store, request.sender_id).await?;
    let pair = resolve_parties(&sender.role, &caller.role);

    let Some(resolution) = store.resolve_request(request_id, status, pair).await? else {
        // Lost a race with another transition or a delete.
        let current = store
            .get_request(request_id)
            .await?
            .ok_or(LedgerError::NotFound("connection request"))?;
        return Err(LedgerError::InvalidTransition {
            status: current.status,
        });
    };

    let mut chat_room_id = None;
    if let Some(rel) = &resolution.relationship {
        match store.ensure_chat_room(rel.pair(), rel.id).await {
            Ok(room) => chat_room_id = Some(room.id),
            Err(e) => warn!(
                relationship_id = rel.id,
                error = %e,
                "failed to provision chat room"
            ),
        }
    }

    info!(
        request_id,
        status = %status,
        relationship_id = resolution.relationship.as_ref().map(|r| r.id),
        relationship_created = resolution.relationship_created,
        "connection request resolved"
    );

    let kind = match status {
        RequestStatus::Accepted => NotificationKind::ConnectionRequestAccepted,
        _ => NotificationKind::ConnectionRequestRejected,
    };
    notifier.notify_after_commit(caller, &sender, kind).await;

    Ok(StatusChange {
        request: resolution.request,
        relationship: resolution.relationship,
        chat_room_id,
    })
}

/// Removes a request. An accepted connection takes its relationship (and
/// entries) with it, which is refused while the balance is not settled.
/// Returns the deleted relationship id, if any.
pub async fn delete_connection(
    store: &dyn Store,
    notifier: &Notifier,
    caller: &User,
    request_id: i64,
) -> Result<Option<i64>, LedgerError> {
    let request = store
        .get_request(request_id)
        .await?
        .ok_or(LedgerError::NotFound("connection request"))?;
    let other_id = request
        .counterpart(caller.id)
        .ok_or_else(|| LedgerError::forbidden("you are not part of this connection"))?;
    let other = load_user(store, other_id).await?;
    let pair = resolve_parties(&caller.role, &other.role);

    match store.disconnect(request_id, pair).await? {
        Disconnect::Missing => Err(LedgerError::NotFound("connection request")),
        Disconnect::PendingBalance(pending_due) => {
            Err(LedgerError::PendingBalance { pending_due })
        }
        Disconnect::Removed { relationship_id } => {
            info!(
                request_id,
                relationship_id,
                status = %request.status,
                "connection removed"
            );
            if request.status == RequestStatus::Accepted {
                notifier
                    .notify_after_commit(caller, &other, NotificationKind::ConnectionRemoved)
                    .await;
            }
            Ok(relationship_id)
        }
    }
}

pub async fn list_requests(
    store: &dyn Store,
    caller: &User,
    filter: RequestFilter,
) -> Result<Vec<RequestView>, LedgerError> {
    let requests = store.list_requests(caller.id, filter).await?;
    let mut views = Vec::with_capacity(requests.len());
    for request in requests {
        let counterpart = match request.counterpart(caller.id) {
            Some(id) => store.get_user(id).await?,
            None => None,
        };
        views.push(RequestView {
            request,
            counterpart,
        });
    }
    Ok(views)
}

pub async fn list_connected(store: &dyn Store, caller: &User) -> Result<Vec<Connection>, LedgerError> {
    let requests = store.list_requests(caller.id, RequestFilter::Accepted).await?;
    let mut connections = Vec::with_capacity(requests.len());
    for request in requests {
        let Some(other_id) = request.counterpart(caller.id) else {
            continue;
        };
        let Some(user) = store.get_user(other_id).await? else {
            continue;
        };
        let relationship_id = match resolve_parties(&caller.role, &user.role) {
            Some(pair) => store.find_relationship(pair).await?.map(|r| r.id),
            None => None,
        };
        connections.push(Connection {
            request_id: request.id,
            user,
            connected_at: request.updated_at,
            relationship_id,
        });
    }
    Ok(connections)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub existing: usize,
    pub unresolvable: usize,
}

/// Gets-or-creates the relationship and chat room behind every accepted
/// request.
pub async fn sync_relationships(store: &dyn Store) -> Result<SyncReport, LedgerError> {
    let mut report = SyncReport::default();
    for request in store.list_accepted_requests().await? {
        let sender = store.get_user(request.sender_id).await?;
        let receiver = store.get_user(request.receiver_id).await?;
        let pair = match (&sender, &receiver) {
            (Some(s), Some(r)) => resolve_parties(&s.role, &r.role),
            _ => None,
        };
        let Some(pair) = pair else {
            warn!(request_id = request.id, "accepted request has no customer/business pair");
            report.unresolvable += 1;
            continue;
        };

        let (rel, created) = store.get_or_create_relationship(pair).await?;
        store.ensure_chat_room(pair, rel.id).await?;
        if created {
            info!(request_id = request.id, relationship_id = rel.id, "relationship created");
            report.created += 1;
        } else {
            report.existing += 1;
        }
    }
    Ok(report)
}
