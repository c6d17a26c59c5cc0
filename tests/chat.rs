mod common;

use axum::http::StatusCode;
use common::TestApp;
use hisab_khata::chat::ChatEvent;
use serde_json::json;

#[tokio::test]
async fn accepted_connection_gets_a_room_that_fans_out() {
    let app = TestApp::new();
    let shop = app.business("ram@example.com", "Ram Kirana").await;
    let customer = app.customer("sita@example.com").await;
    let (_, rel, room) = app.connect(shop, customer).await;

    let (_, body) = app.get("/chat/rooms", customer).await;
    let rooms = body["data"].as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["id"], room);
    assert_eq!(rooms[0]["relationship_id"], rel);

    let mut events = app.state.hub.subscribe(room).await;

    let (status, body) = app
        .post(
            &format!("/chat/rooms/{room}/messages"),
            customer,
            json!({ "content": "namaste" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["kind"], "text");

    match events.recv().await.unwrap() {
        ChatEvent::ChatMessage { message } => {
            assert_eq!(message.content, "namaste");
            assert_eq!(message.sender_id, customer);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let (status, body) = app
        .post(&format!("/chat/rooms/{room}/read"), shop, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["marked_read"], 1);
    assert!(matches!(
        events.recv().await.unwrap(),
        ChatEvent::MessagesRead { count: 1, .. }
    ));

    let (_, body) = app
        .get(&format!("/chat/rooms/{room}/messages"), customer)
        .await;
    assert!(body["data"][0]["read_at"].is_string());
}

#[tokio::test]
async fn history_survives_disconnect_but_sending_does_not() {
    let app = TestApp::new();
    let shop = app.business("ram@example.com", "Ram Kirana").await;
    let customer = app.customer("sita@example.com").await;
    let (request_id, _, room) = app.connect(shop, customer).await;
    let uri = format!("/chat/rooms/{room}/messages");

    app.post(&uri, shop, json!({ "content": "bill sent" })).await;

    let (status, _) = app
        .delete(&format!("/connections/{request_id}"), shop)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.post(&uri, customer, json!({ "content": "hello?" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CHAT_NOT_ALLOWED");

    let (status, body) = app.get(&uri, customer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 1);

    // Reconnecting relinks the same room.
    let (_, _, again) = app.connect(customer, shop).await;
    assert_eq!(again, room);
    let (status, _) = app.post(&uri, customer, json!({ "content": "back" })).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn only_participants_use_a_room() {
    let app = TestApp::new();
    let shop = app.business("ram@example.com", "Ram Kirana").await;
    let customer = app.customer("sita@example.com").await;
    let stranger = app.customer("hari@example.com").await;
    let (_, _, room) = app.connect(shop, customer).await;
    let uri = format!("/chat/rooms/{room}/messages");

    let (status, _) = app.get(&uri, stranger).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.post(&uri, stranger, json!({ "content": "hi" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.post(&uri, customer, json!({ "content": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, _) = app.get("/chat/rooms/9999/messages", customer).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_pages_oldest_first() {
    let app = TestApp::new();
    let shop = app.business("ram@example.com", "Ram Kirana").await;
    let customer = app.customer("sita@example.com").await;
    let (_, _, room) = app.connect(shop, customer).await;
    let uri = format!("/chat/rooms/{room}/messages");

    for i in 0..5 {
        app.post(&uri, shop, json!({ "content": format!("msg {i}") }))
            .await;
    }

    let (_, body) = app.get(&format!("{uri}?page=2&per_page=2"), customer).await;
    let page = body["data"].as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["content"], "msg 2");
    assert_eq!(page[1]["content"], "msg 3");
    assert_eq!(body["pagination"]["total"], 5);
    assert_eq!(body["pagination"]["total_pages"], 3);

    let (_, body) = app.get(&format!("{uri}?per_page=500"), customer).await;
    assert_eq!(body["pagination"]["per_page"], 100);
}
