#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use hisab_khata::{
    AppState, build_state,
    config::Config,
    init_router,
    notify::{NoopPushClient, PushClient},
    store::MemoryStore,
};
use serde_json::{Value, json};
use tower::ServiceExt;

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_push(Arc::new(NoopPushClient))
    }

    pub fn with_push(push: Arc<dyn PushClient>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = build_state(Config::default(), store.clone(), push);
        let router = init_router(state.clone());
        Self {
            store,
            state,
            router,
        }
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        user_id: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user_id {
            builder = builder.header("X-User-ID", id.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, user_id: i64) -> (StatusCode, Value) {
        self.call("GET", uri, Some(user_id), None).await
    }

    pub async fn post(&self, uri: &str, user_id: i64, body: Value) -> (StatusCode, Value) {
        self.call("POST", uri, Some(user_id), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, user_id: i64, body: Value) -> (StatusCode, Value) {
        self.call("PATCH", uri, Some(user_id), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user_id: i64) -> (StatusCode, Value) {
        self.call("DELETE", uri, Some(user_id), None).await
    }

    /// Registers a user over the API and returns its id.
    pub async fn register(&self, email: &str, profile: Value) -> i64 {
        let (status, body) = self
            .call(
                "POST",
                "/users",
                None,
                Some(json!({
                    "email": email,
                    "full_name": email.split('@').next().unwrap(),
                    "profile": profile,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        body["data"]["id"].as_i64().unwrap()
    }

    pub async fn customer(&self, email: &str) -> i64 {
        self.register(email, json!({ "type": "customer" })).await
    }

    pub async fn business(&self, email: &str, name: &str) -> i64 {
        self.register(email, json!({ "type": "business", "business_name": name }))
            .await
    }

    /// `sender` invites `receiver` and the receiver accepts. Returns the
    /// request id, relationship id and chat room id.
    pub async fn connect(&self, sender: i64, receiver: i64) -> (i64, i64, i64) {
        let (status, body) = self
            .post("/connections", sender, json!({ "receiver_id": receiver }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "send failed: {body}");
        let request_id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = self
            .patch(
                &format!("/connections/{request_id}/status"),
                receiver,
                json!({ "status": "accepted" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "accept failed: {body}");
        let relationship_id = body["data"]["relationship"]["id"].as_i64().unwrap();
        let room_id = body["data"]["chat_room_id"].as_i64().unwrap();
        (request_id, relationship_id, room_id)
    }

    pub async fn record(
        &self,
        user_id: i64,
        relationship_id: i64,
        amount: &str,
        kind: &str,
    ) -> (StatusCode, Value) {
        self.post(
            "/transactions",
            user_id,
            json!({
                "relationship_id": relationship_id,
                "amount": amount,
                "kind": kind,
            }),
        )
        .await
    }
}
