//! Session behavior over a real WebSocket

use serde_json::json;

use alo_sync::alo_core::ConnectionError;
use alo_sync::alo_net::test_utils::FakeApi;
use alo_sync::prelude::*;

use super::mock_server::MockChatServer;
use crate::{api_with_conversations, credential, next_update, settings_for, ME, TOKEN};

type LiveSession = Session<WsConnector, FakeApi, Vec<Notification>>;

async fn live_session(server: &MockChatServer) -> LiveSession {
    let mut session = Session::new(
        &settings_for(&server.ws_url()),
        credential(),
        WsConnector,
        api_with_conversations(),
        Vec::new(),
    );
    session.start().await.unwrap();
    session
}

async fn wait_for_state(session: &mut LiveSession, pred: impl Fn(&ConnectionState) -> bool) {
    loop {
        if let SessionUpdate::Connection(state) = next_update(session).await {
            if pred(&state) {
                return;
            }
        }
    }
}

#[tokio::test]
async fn test_handshake_carries_token() {
    let mut server = MockChatServer::start(TOKEN).await;
    let session = live_session(&server).await;

    let conn = server.accept().await;

    assert_eq!(conn.token.as_deref(), Some(TOKEN));
    assert!(session.connection_state().is_open());
    assert_eq!(session.store().len(), 1);
}

#[tokio::test]
async fn test_optimistic_send_round_trip() {
    let mut server = MockChatServer::start(TOKEN).await;
    let mut session = live_session(&server).await;
    let mut conn = server.accept().await;

    let local = session.send_message("c1", "hello", MessageKind::Text, None);
    let sent = conn.recv_event().await;
    assert_eq!(sent["event"], "message:send");
    assert_eq!(sent["payload"]["clientId"], json!(local.id));

    conn.send_event(
        "message:new",
        json!({
            "_id": "srv-1",
            "client_id": local.id,
            "conversation_id": "c1",
            "sender_id": ME,
            "content": "hello",
            "type": "text",
            "status": [{"user_id": ME, "status": "sent"}],
            "created_at": "2024-05-01T10:00:00.123"
        }),
    )
    .await;

    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Sync(SyncEvent::MessageResolved {
            conversation_id: "c1".into(),
            client_id: local.id.clone(),
            message_id: "srv-1".into(),
        })
    );
    let messages = session.store().messages("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "srv-1");
    assert_eq!(messages[0].status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_inbound_messages_count_unread_and_notify() {
    let mut server = MockChatServer::start(TOKEN).await;
    let mut session = live_session(&server).await;
    let mut conn = server.accept().await;

    for id in ["m1", "m2", "m3"] {
        conn.send_event(
            "message:new",
            json!({"id": id, "conversationId": "c1", "senderId": "ana", "content": id}),
        )
        .await;
    }
    for _ in 0..3 {
        next_update(&mut session).await;
    }

    assert_eq!(session.store().unread_count("c1"), 3);
    assert_eq!(session.sink().len(), 3);
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let server = MockChatServer::start("another-token").await;
    let mut session: LiveSession = Session::new(
        &settings_for(&server.ws_url()),
        credential(),
        WsConnector,
        api_with_conversations(),
        Vec::new(),
    );

    let err = session.start().await.unwrap_err();

    assert!(err.is_auth());
    assert_eq!(
        session.connection_state(),
        ConnectionState::Failed {
            reason: ConnectionError::Unauthorized
        }
    );
}

#[tokio::test]
async fn test_reconnects_and_flushes_queue_in_order() {
    let mut server = MockChatServer::start(TOKEN).await;
    let mut session = live_session(&server).await;
    let conn = server.accept().await;

    drop(conn);
    wait_for_state(&mut session, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;

    session.send_message("c1", "a", MessageKind::Text, None);
    session.send_message("c1", "b", MessageKind::Text, None);

    let mut conn = server.accept().await;
    let first = conn.recv_event().await;
    let second = conn.recv_event().await;
    assert_eq!(first["payload"]["content"], "a");
    assert_eq!(second["payload"]["content"], "b");

    wait_for_state(&mut session, ConnectionState::is_open).await;
}

#[tokio::test]
async fn test_unauthorized_close_code_is_terminal() {
    let mut server = MockChatServer::start(TOKEN).await;
    let mut session = live_session(&server).await;
    let conn = server.accept().await;

    conn.close_with(4001).await;

    wait_for_state(&mut session, ConnectionState::is_failed).await;
    assert_eq!(
        session.connection_state(),
        ConnectionState::Failed {
            reason: ConnectionError::Unauthorized
        }
    );
}
