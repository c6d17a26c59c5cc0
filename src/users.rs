use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LedgerError;
use crate::store::Store;
use crate::types::{NewProfile, NewUser, RequestStatus, User};

pub const SEARCH_LIMIT: usize = 10;

/// Registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub profile: NewProfile,
}

/// Emails are stored trimmed and lowercased; lookups go through the same form.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub async fn register(store: &dyn Store, registration: Registration) -> Result<User, LedgerError> {
    let email = normalize_email(&registration.email);
    if email.is_empty() || !email.contains('@') {
        return Err(LedgerError::validation("a valid email is required"));
    }
    let full_name = registration.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(LedgerError::validation("full_name is required"));
    }
    let phone_number = registration
        .phone_number
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    let profile = match registration.profile {
        NewProfile::Business { business_name } => {
            let business_name = business_name.trim().to_string();
            if business_name.is_empty() {
                return Err(LedgerError::validation("business_name is required"));
            }
            NewProfile::Business { business_name }
        }
        NewProfile::Customer => NewProfile::Customer,
    };

    let user = store
        .create_user(NewUser {
            email,
            full_name,
            phone_number,
            profile,
        })
        .await?;
    info!(user_id = user.id, business = user.role.is_business(), "user registered");
    Ok(user)
}

/// Resolves the authenticated user id supplied by the gateway.
pub async fn authenticate(store: &dyn Store, user_id: i64) -> Result<User, LedgerError> {
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| LedgerError::Unauthenticated("unknown user".into()))
}

pub async fn set_device_token(
    store: &dyn Store,
    caller: &User,
    token: Option<String>,
) -> Result<(), LedgerError> {
    let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    store.set_device_token(caller.id, token).await?;
    Ok(())
}

/// A search hit annotated with any request between it and the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub user: User,
    pub connection_status: Option<RequestStatus>,
    pub request_id: Option<i64>,
    pub is_sender: Option<bool>,
}

pub async fn search(
    store: &dyn Store,
    caller: &User,
    query: &str,
) -> Result<Vec<SearchResult>, LedgerError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(LedgerError::validation(
            "please provide a search query (email or phone number)",
        ));
    }

    let users = store.search_users(query, caller.id, SEARCH_LIMIT).await?;
    let mut results = Vec::with_capacity(users.len());
    for user in users {
        let request = store.find_request_between(caller.id, user.id).await?;
        results.push(SearchResult {
            connection_status: request.as_ref().map(|r| r.status),
            request_id: request.as_ref().map(|r| r.id),
            is_sender: request.as_ref().map(|r| r.sender_id == caller.id),
            user,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};

    fn customer(email: &str) -> Registration {
        Registration {
            email: email.into(),
            full_name: "Bina".into(),
            phone_number: Some("9800000001".into()),
            profile: NewProfile::Customer,
        }
    }

    #[tokio::test]
    async fn register_normalises_email_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let user = register(&store, customer(" Bina@Example.com ")).await.unwrap();
        assert_eq!(user.email, "bina@example.com");

        let mut again = customer("bina@example.com");
        again.phone_number = None;
        let err = register(&store, again).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn business_needs_a_name() {
        let store = MemoryStore::new();
        let err = register(
            &store,
            Registration {
                email: "shop@example.com".into(),
                full_name: "Ram".into(),
                phone_number: None,
                profile: NewProfile::Business {
                    business_name: " ".into(),
                },
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn search_excludes_caller_and_reports_requests() {
        let store = MemoryStore::new();
        let me = register(&store, customer("me@example.com")).await.unwrap();
        let mut other = customer("other@example.com");
        other.phone_number = None;
        let other = register(&store, other).await.unwrap();
        let request = store.insert_request(other.id, me.id).await.unwrap();

        let hits = search(&store, &me, "example").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user.id, other.id);
        assert_eq!(hits[0].request_id, Some(request.id));
        assert_eq!(hits[0].connection_status, Some(RequestStatus::Pending));
        assert_eq!(hits[0].is_sender, Some(false));

        assert!(search(&store, &me, "   ").await.is_err());
    }

    #[tokio::test]
    async fn unknown_ids_are_unauthenticated() {
        let store = MemoryStore::new();
        assert!(matches!(
            authenticate(&store, 42).await,
            Err(LedgerError::Unauthenticated(_))
        ));
    }
}
