mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::http::StatusCode;
use common::TestApp;
use hisab_khata::notify::{PushClient, PushMessage};
use serde_json::json;

#[derive(Default)]
struct FailingPush {
    attempts: AtomicUsize,
}

#[async_trait]
impl PushClient for FailingPush {
    async fn send(&self, _message: &PushMessage) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("gateway unavailable")
    }
}

#[tokio::test]
async fn push_failure_does_not_fail_transitions() {
    let push = Arc::new(FailingPush::default());
    let app = TestApp::with_push(push.clone());
    let shop = app.business("ram@example.com", "Ram Kirana").await;
    let customer = app.customer("sita@example.com").await;

    for user in [shop, customer] {
        let (status, body) = app
            .call(
                "PUT",
                "/users/me/device-token",
                Some(user),
                Some(json!({ "device_token": format!("device-{user}") })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["registered"], true);
    }

    let (status, body) = app
        .post("/connections", shop, json!({ "receiver_id": customer }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let request_id = body["data"]["id"].as_i64().unwrap();

    let (status, _) = app
        .patch(
            &format!("/connections/{request_id}/status"),
            customer,
            json!({ "status": "accepted" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Push runs on spawned tasks; give them a moment to fail.
    for _ in 0..50 {
        if push.attempts.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(push.attempts.load(Ordering::SeqCst), 2);

    let (_, body) = app.get("/notifications", shop).await;
    let found = body["data"].as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["type"], "connection_request_accepted");
    assert_eq!(found[0]["title"], "Connection Request Accepted");
}

#[tokio::test]
async fn notifications_can_be_read_one_by_one_or_all_at_once() {
    let app = TestApp::new();
    let shop = app.business("ram@example.com", "Ram Kirana").await;
    let a = app.customer("a@example.com").await;
    let b = app.customer("b@example.com").await;

    app.post("/connections", a, json!({ "receiver_id": shop })).await;
    app.post("/connections", b, json!({ "receiver_id": shop })).await;

    let (_, body) = app.get("/notifications/unread-count", shop).await;
    assert_eq!(body["data"]["unread_count"], 2);

    let (_, body) = app.get("/notifications?unread=true", shop).await;
    let newest = body["data"][0]["id"].as_i64().unwrap();
    assert_eq!(body["data"][0]["sender_id"], b);

    let (status, _) = app
        .patch(&format!("/notifications/{newest}/read"), a, json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .patch(&format!("/notifications/{newest}/read"), shop, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_read"], true);

    let (_, body) = app.get("/notifications?unread=true", shop).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = app
        .patch("/notifications/read-all", shop, json!({}))
        .await;
    assert_eq!(body["data"]["updated"], 1);
    let (_, body) = app.get("/notifications/unread-count", shop).await;
    assert_eq!(body["data"]["unread_count"], 0);
    let (_, body) = app.get("/notifications", shop).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
