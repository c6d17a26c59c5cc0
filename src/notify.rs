//! In-app notifications and best-effort push delivery.
//!
//! The in-app row is written first; push runs on a spawned task and its
//! failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LedgerError;
use crate::store::Store;
use crate::types::{NewNotification, Notification, NotificationKind, User};

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// A push payload addressed to one device.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub device_token: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait PushClient: Send + Sync {
    async fn send(&self, message: &PushMessage) -> anyhow::Result<()>;
}

/// Used when no push endpoint is configured.
pub struct NoopPushClient;

#[async_trait]
impl PushClient for NoopPushClient {
    async fn send(&self, message: &PushMessage) -> anyhow::Result<()> {
        debug!(title = %message.title, "push disabled, dropping message");
        Ok(())
    }
}

/// Posts push messages as JSON to an HTTP gateway.
pub struct HttpPushClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpPushClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .context("Failed to build push HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl PushClient for HttpPushClient {
    async fn send(&self, message: &PushMessage) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.endpoint).json(message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("push request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "push gateway returned {status}: {}",
                body.chars().take(200).collect::<String>()
            );
        }
        Ok(())
    }
}

/// Builds the push client described by `config`.
pub fn push_client_from_config(config: &Config) -> anyhow::Result<Arc<dyn PushClient>> {
    match &config.push_endpoint {
        Some(endpoint) => Ok(Arc::new(HttpPushClient::new(
            endpoint.clone(),
            config.push_api_key.clone(),
        )?)),
        None => Ok(Arc::new(NoopPushClient)),
    }
}

/// The texts shown for each notification kind.
fn render(kind: NotificationKind, sender_name: &str) -> (String, String, &'static str) {
    match kind {
        NotificationKind::ConnectionRequest => (
            "New Connection Request".to_string(),
            format!("{sender_name} sent you a connection request."),
            "view_requests",
        ),
        NotificationKind::ConnectionRequestAccepted => (
            "Connection Request Accepted".to_string(),
            format!("{sender_name} accepted your connection request."),
            "view_connections",
        ),
        NotificationKind::ConnectionRequestRejected => (
            "Connection Request Rejected".to_string(),
            format!("{sender_name} rejected your connection request."),
            "view_requests",
        ),
        NotificationKind::ConnectionRemoved => (
            "Connection Removed".to_string(),
            format!("{sender_name} has removed the connection with you."),
            "view_connections",
        ),
    }
}

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
    push: Arc<dyn PushClient>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, push: Arc<dyn PushClient>) -> Self {
        Self { store, push }
    }

    /// Persists the in-app notification and schedules a push to the
    /// receiver's device, if it has one.
    pub async fn notify(
        &self,
        sender: &User,
        receiver: &User,
        kind: NotificationKind,
    ) -> Result<Notification, LedgerError> {
        let (title, message, action) = render(kind, &sender.full_name);
        let created = self
            .store
            .insert_notification(NewNotification {
                sender_id: sender.id,
                receiver_id: receiver.id,
                kind,
                title: title.clone(),
                message: message.clone(),
            })
            .await?;

        if let Some(token) = receiver.device_token.clone() {
            let push = PushMessage {
                device_token: token,
                title,
                body: message,
                data: json!({
                    "type": kind,
                    "sender_name": sender.full_name,
                    "sender_email": sender.email,
                    "action": action,
                }),
            };
            let client = Arc::clone(&self.push);
            let receiver_id = receiver.id;
            tokio::spawn(async move {
                if let Err(e) = client.send(&push).await {
                    warn!(receiver_id, error = %e, "push delivery failed");
                }
            });
        }

        Ok(created)
    }

    /// Like [`Notifier::notify`] but never fails; used after a state change
    /// has already been committed.
    pub async fn notify_after_commit(&self, sender: &User, receiver: &User, kind: NotificationKind) {
        if let Err(e) = self.notify(sender, receiver, kind).await {
            warn!(
                sender_id = sender.id,
                receiver_id = receiver.id,
                kind = %kind,
                error = %e,
                "failed to record notification"
            );
        }
    }

    pub async fn list(
        &self,
        receiver_id: i64,
        unread_only: bool,
    ) -> Result<Vec<Notification>, LedgerError> {
        Ok(self.store.list_notifications(receiver_id, unread_only).await?)
    }

    pub async fn unread_count(&self, receiver_id: i64) -> Result<u64, LedgerError> {
        Ok(self.store.unread_count(receiver_id).await?)
    }

    /// Only the receiver can mark a notification read; anyone else sees it
    /// as missing.
    pub async fn mark_read(&self, id: i64, receiver_id: i64) -> Result<Notification, LedgerError> {
        self.store
            .mark_notification_read(id, receiver_id)
            .await?
            .ok_or(LedgerError::NotFound("notification"))
    }

    pub async fn mark_all_read(&self, receiver_id: i64) -> Result<u64, LedgerError> {
        Ok(self.store.mark_all_read(receiver_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{NewProfile, NewUser};
    use tokio::sync::mpsc;

    struct Recording(mpsc::UnboundedSender<PushMessage>);

    #[async_trait]
    impl PushClient for Recording {
        async fn send(&self, message: &PushMessage) -> anyhow::Result<()> {
            self.0.send(message.clone())?;
            Ok(())
        }
    }

    async fn user(store: &MemoryStore, email: &str, profile: NewProfile) -> User {
        store
            .create_user(NewUser {
                email: email.into(),
                full_name: email.split('@').next().unwrap().into(),
                phone_number: None,
                profile,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn push_goes_to_receivers_with_a_token() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(store.clone(), Arc::new(Recording(tx)));

        let sender = user(&store, "bina@example.com", NewProfile::Customer).await;
        let mut receiver = user(
            &store,
            "shop@example.com",
            NewProfile::Business {
                business_name: "Shop".into(),
            },
        )
        .await;
        receiver.device_token = Some("device-1".into());

        let created = notifier
            .notify(&sender, &receiver, NotificationKind::ConnectionRequest)
            .await
            .unwrap();
        assert_eq!(created.title, "New Connection Request");
        assert!(!created.is_read);

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.device_token, "device-1");
        assert_eq!(pushed.data["type"], "connection_request");
        assert_eq!(notifier.unread_count(receiver.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn only_receiver_marks_read() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store.clone(), Arc::new(NoopPushClient));
        let a = user(&store, "a@example.com", NewProfile::Customer).await;
        let b = user(&store, "b@example.com", NewProfile::Customer).await;

        let n = notifier
            .notify(&a, &b, NotificationKind::ConnectionRemoved)
            .await
            .unwrap();
        assert!(matches!(
            notifier.mark_read(n.id, a.id).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(notifier.mark_read(n.id, b.id).await.unwrap().is_read);
        assert_eq!(notifier.mark_all_read(b.id).await.unwrap(), 0);
    }
}
