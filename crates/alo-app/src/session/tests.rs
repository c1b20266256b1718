//! Session tests against the in-memory connector and REST fakes

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use alo_core::{ConnectionError, ConversationKind, MessageStatus};
use alo_net::test_utils::{FakeApi, FakeConnector, FakeServer, FakeServers};
use alo_net::ReconnectPolicy;

use super::*;
use crate::notifications::{Notification, NotificationKind};

type TestSession = Session<FakeConnector, FakeApi, Vec<Notification>>;

const ME: &str = "me";

fn connection_settings() -> ConnectionSettings {
    ConnectionSettings {
        ws_url: "ws://chat.test/ws".to_string(),
        heartbeat: Duration::from_secs(3600),
        idle_timeout: None,
        close_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy::fixed(Duration::from_secs(1)),
    }
}

fn conversations() -> Vec<Conversation> {
    vec![
        Conversation::new("c1", ConversationKind::Private).with_members([ME, "ana"]),
        Conversation::new("c2", ConversationKind::Group)
            .with_name("Crew")
            .with_members([ME, "ana", "bo"]),
    ]
}

fn new_session() -> (TestSession, FakeConnector, FakeApi, FakeServers) {
    let (connector, servers) = FakeConnector::new();
    let api = FakeApi::new().with_conversations(conversations());
    let session = Session::with_connection_settings(
        connection_settings(),
        SyncSettings::default(),
        Credential::new("tok-1", ME),
        connector.clone(),
        api.clone(),
        Vec::new(),
    );
    (session, connector, api, servers)
}

async fn started() -> (TestSession, FakeApi, FakeServer, FakeServers) {
    let (mut session, _connector, api, mut servers) = new_session();
    session.start().await.unwrap();
    let server = servers.next().await.unwrap();
    (session, api, server, servers)
}

fn wire_message(conversation: &str, id: &str, sender: &str) -> Value {
    json!({
        "_id": id,
        "conversation_id": conversation,
        "sender_id": sender,
        "content": format!("text {id}"),
        "type": "text",
    })
}

fn history_message(conversation: &str, id: &str) -> Message {
    Message {
        id: id.to_string(),
        client_id: None,
        conversation_id: conversation.to_string(),
        sender_id: "ana".to_string(),
        content: format!("old {id}"),
        kind: MessageKind::Text,
        file: None,
        status: MessageStatus::Read,
        created_at: Utc::now(),
    }
}

fn message_ids(session: &TestSession, conversation: &str) -> Vec<String> {
    session
        .store()
        .messages(conversation)
        .iter()
        .map(|m| m.id.clone())
        .collect()
}

// ─────────────────────────────────────────────────────────
// Start / logout
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_connects_and_loads_conversations() {
    let (session, api, server, _servers) = started().await;

    assert!(server.url().query().unwrap_or_default().contains("token=tok-1"));
    assert!(session.connection_state().is_open());
    assert_eq!(session.store().len(), 2);
    assert_eq!(api.calls(), vec!["fetch_conversations".to_string()]);
}

#[tokio::test]
async fn test_start_propagates_rest_auth_error() {
    let (mut session, _connector, api, _servers) = new_session();
    api.fail_next("fetch_conversations", 401);

    let err = session.start().await.unwrap_err();

    assert!(err.is_auth());
    assert!(session.store().is_empty());
}

#[tokio::test]
async fn test_start_propagates_socket_rejection() {
    let (mut session, connector, api, _servers) = new_session();
    connector.fail_next(ConnectionError::Unauthorized);

    let err = session.start().await.unwrap_err();

    assert!(err.is_auth());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_logout_resets_everything() {
    let (mut session, _api, server, _servers) = started().await;
    server.push_event("message:new", wire_message("c1", "m1", "ana"));
    session.next_update().await.unwrap();

    session.logout().await;

    assert!(session.store().is_empty());
    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(session.next_update().await.is_none());
}

// ─────────────────────────────────────────────────────────
// Optimistic sends
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_message_resolves_on_echo() {
    let (mut session, _api, mut server, _servers) = started().await;

    let local = session.send_message("c1", "hi", MessageKind::Text, None);
    assert_eq!(session.store().messages("c1")[0].status, MessageStatus::Sending);

    let sent = server.recv_event().await.unwrap();
    assert_eq!(sent.event, "message:send");
    assert_eq!(sent.payload["clientId"], json!(local.id));
    assert_eq!(sent.payload["content"], json!("hi"));

    server.push_event(
        "message:new",
        json!({
            "id": "srv-1",
            "clientId": local.id,
            "conversationId": "c1",
            "senderId": ME,
            "content": "hi",
            "type": "text",
        }),
    );
    let update = session.next_update().await.unwrap();

    assert_eq!(
        update,
        SessionUpdate::Sync(SyncEvent::MessageResolved {
            conversation_id: "c1".into(),
            client_id: local.id.clone(),
            message_id: "srv-1".into(),
        })
    );
    let stored = session.store().messages("c1");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, "srv-1");
    assert_eq!(stored[0].content, "hi");
    assert_eq!(stored[0].status, MessageStatus::Sent);
    assert!(!session.is_pending(&local.id));
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_send_fails_and_retries() {
    let (mut session, _api, mut server, _servers) = started().await;
    let local = session.send_message("c1", "hi", MessageKind::Text, None);
    server.recv_event().await.unwrap();

    let update = session.next_update().await.unwrap();

    assert_eq!(update, SessionUpdate::SendsFailed(vec![local.id.clone()]));
    assert_eq!(session.store().messages("c1").len(), 1);
    assert_eq!(session.store().messages("c1")[0].status, MessageStatus::Failed);

    assert!(session.retry_message(&local.id));
    let resent = server.recv_event().await.unwrap();
    assert_eq!(resent.payload["clientId"], json!(local.id));
    assert_eq!(session.store().messages("c1")[0].status, MessageStatus::Sending);
    assert!(!session.retry_message(&local.id));
}

#[tokio::test(start_paused = true)]
async fn test_sends_while_disconnected_arrive_in_order() {
    let (mut session, _api, server, mut servers) = started().await;
    drop(server);

    session.send_message("c1", "a", MessageKind::Text, None);
    session.send_message("c1", "b", MessageKind::Text, None);

    let mut next = servers.next().await.unwrap();
    let first = next.recv_event().await.unwrap();
    let second = next.recv_event().await.unwrap();
    assert_eq!(first.payload["content"], json!("a"));
    assert_eq!(second.payload["content"], json!("b"));
}

// ─────────────────────────────────────────────────────────
// Inbound updates
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_delivery_stored_once() {
    let (mut session, _api, server, _servers) = started().await;
    server.push_event("message:new", wire_message("c1", "m1", "ana"));
    server.push_event("message:new", wire_message("c1", "m1", "ana"));

    session.next_update().await.unwrap();
    let second = session.next_update().await.unwrap();

    assert_eq!(
        second,
        SessionUpdate::Sync(SyncEvent::Duplicate {
            message_id: "m1".into()
        })
    );
    assert_eq!(message_ids(&session, "c1"), vec!["m1".to_string()]);
    assert_eq!(session.sink().len(), 1);
    assert_eq!(session.sink()[0].kind, NotificationKind::Message);
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_updates() {
    let (mut session, _api, server, _servers) = started().await;
    server.push("{oops");
    server.push_event("message:new", wire_message("c1", "m1", "ana"));

    assert_eq!(
        session.next_update().await.unwrap(),
        SessionUpdate::Sync(SyncEvent::Ignored)
    );
    assert!(matches!(
        session.next_update().await.unwrap(),
        SessionUpdate::Sync(SyncEvent::MessageAdded { .. })
    ));
}

#[tokio::test]
async fn test_unknown_conversation_is_fetched() {
    let (mut session, api, server, _servers) = started().await;
    let created = api
        .create_conversation(&NewConversation::group(
            "Team",
            vec![ME.to_string(), "bo".to_string()],
        ))
        .await
        .unwrap();

    server.push_event("message:new", wire_message(&created.id, "m1", "bo"));
    session.next_update().await.unwrap();

    let conversation = session.store().conversation(&created.id).unwrap();
    assert_eq!(conversation.name.as_deref(), Some("Team"));
    assert_eq!(conversation.kind, ConversationKind::Group);
    assert_eq!(conversation.unread_count, 1);
    let fetches = api
        .calls()
        .iter()
        .filter(|c| c.as_str() == "fetch_conversations")
        .count();
    assert_eq!(fetches, 2);
}

fn fetch_count(api: &FakeApi) -> usize {
    api.calls()
        .iter()
        .filter(|c| c.as_str() == "fetch_conversations")
        .count()
}

#[tokio::test]
async fn test_failed_refresh_is_retried_on_next_frame() {
    let (mut session, api, server, _servers) = started().await;
    let created = api
        .create_conversation(&NewConversation::group("Team", vec![ME.to_string()]))
        .await
        .unwrap();
    api.fail_next("fetch_conversations", 503);

    server.push_event("message:new", wire_message(&created.id, "m1", "bo"));
    session.next_update().await.unwrap();
    assert_eq!(session.store().conversation(&created.id).unwrap().name, None);

    server.push_event("message:new", wire_message("c1", "m2", "ana"));
    session.next_update().await.unwrap();

    assert_eq!(fetch_count(&api), 3);
    let conversation = session.store().conversation(&created.id).unwrap();
    assert_eq!(conversation.name.as_deref(), Some("Team"));
}

#[tokio::test]
async fn test_rejected_refresh_is_not_retried() {
    let (mut session, api, server, _servers) = started().await;
    api.fail_next("fetch_conversations", 400);

    server.push_event("message:new", wire_message("c9", "m1", "bo"));
    session.next_update().await.unwrap();
    server.push_event("message:new", wire_message("c1", "m2", "ana"));
    session.next_update().await.unwrap();

    assert_eq!(fetch_count(&api), 2);
    assert!(session.store().contains_conversation("c9"));
}

#[tokio::test(start_paused = true)]
async fn test_typing_indicator_expires() {
    let (mut session, _api, server, _servers) = started().await;
    server.push_event("user:typing", json!({"conversationId": "c1", "userId": "ana"}));

    assert!(matches!(
        session.next_update().await.unwrap(),
        SessionUpdate::Sync(SyncEvent::Typing { .. })
    ));
    assert_eq!(session.typist("c1").unwrap().user_id, "ana");

    assert_eq!(
        session.next_update().await.unwrap(),
        SessionUpdate::TypingExpired(vec!["c1".to_string()])
    );
    assert!(session.typist("c1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_is_reported() {
    let (mut session, _api, server, mut servers) = started().await;
    drop(server);

    let mut seen = Vec::new();
    loop {
        match session.next_update().await.unwrap() {
            SessionUpdate::Connection(state) => {
                let open = state.is_open();
                seen.push(state);
                if open {
                    break;
                }
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    assert!(seen.contains(&ConnectionState::Reconnecting { attempt: 1 }));
    assert!(servers.next().await.is_some());
}

// ─────────────────────────────────────────────────────────
// Conversation actions
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_conversation_resets_unread_and_loads_history() {
    let (mut session, api, mut server, _servers) = started().await;
    server.push_event("message:new", wire_message("c1", "m1", "ana"));
    server.push_event("message:new", wire_message("c1", "m2", "ana"));
    session.next_update().await.unwrap();
    session.next_update().await.unwrap();
    assert_eq!(session.store().unread_count("c1"), 2);

    api.set_messages(
        "c1",
        vec![
            history_message("c1", "m0"),
            history_message("c1", "m1"),
            history_message("c1", "m2"),
        ],
    );
    session.open_conversation("c1").await.unwrap();

    assert_eq!(session.store().unread_count("c1"), 0);
    assert!(session.store().is_active("c1"));
    assert_eq!(message_ids(&session, "c1"), vec!["m0", "m1", "m2"]);

    let read = server.recv_event().await.unwrap();
    assert_eq!(read.event, "message:read_all");
    assert_eq!(read.payload["conversationId"], json!("c1"));
}

#[tokio::test]
async fn test_open_conversation_without_unread_sends_nothing() {
    let (mut session, _api, mut server, _servers) = started().await;

    session.open_conversation("c2").await.unwrap();
    session.send_typing("c2");

    let next = server.recv_event().await.unwrap();
    assert_eq!(next.event, "user:typing");
}

#[tokio::test]
async fn test_active_conversation_does_not_count_unread() {
    let (mut session, _api, server, _servers) = started().await;
    session.open_conversation("c1").await.unwrap();

    server.push_event("message:new", wire_message("c1", "m1", "ana"));
    session.next_update().await.unwrap();

    assert_eq!(session.store().unread_count("c1"), 0);
    assert!(session.sink().is_empty());

    session.set_focused(false);
    server.push_event("message:new", wire_message("c1", "m2", "ana"));
    session.next_update().await.unwrap();
    assert_eq!(session.sink().len(), 1);
}

#[tokio::test]
async fn test_create_conversation_inserts_at_head() {
    let (mut session, _api, _server, _servers) = started().await;

    let created = session
        .create_conversation(&NewConversation::private("bo"))
        .await
        .unwrap();

    assert_eq!(session.store().conversations()[0].id, created.id);
    assert_eq!(session.store().len(), 3);
}

#[tokio::test]
async fn test_toggle_pin_rolls_back_on_failure() {
    let (mut session, api, _server, _servers) = started().await;
    api.fail_next("set_pinned", 500);

    let err = session.toggle_pin("c2").await.unwrap_err();

    assert!(matches!(err, Error::Api { status: 500, .. }));
    assert!(!session.store().conversation("c2").unwrap().is_pinned);
    assert_eq!(session.store().conversations()[0].id, "c1");

    assert!(session.toggle_pin("c2").await.unwrap());
    assert_eq!(session.store().conversations()[0].id, "c2");
    assert!(api.calls().contains(&"set_pinned c2 true".to_string()));
}

#[tokio::test]
async fn test_delete_conversation_rolls_back_on_failure() {
    let (mut session, api, server, _servers) = started().await;
    server.push_event("message:new", wire_message("c2", "m1", "bo"));
    session.next_update().await.unwrap();
    api.fail_next("delete_conversation", 403);

    let err = session.delete_conversation("c2").await.unwrap_err();

    assert!(err.is_auth());
    assert_eq!(message_ids(&session, "c2"), vec!["m1".to_string()]);
    let ids: Vec<_> = session
        .store()
        .conversations()
        .iter()
        .map(|c| c.id.clone())
        .collect();
    assert_eq!(ids, vec!["c1", "c2"]);

    session.delete_conversation("c2").await.unwrap();
    assert!(session.store().conversation("c2").is_none());
}

#[tokio::test]
async fn test_clear_conversation_rolls_back_on_failure() {
    let (mut session, api, server, _servers) = started().await;
    server.push_event("message:new", wire_message("c1", "m1", "ana"));
    session.next_update().await.unwrap();
    api.fail_next("clear_messages", 500);

    assert!(session.clear_conversation("c1").await.is_err());
    assert_eq!(message_ids(&session, "c1"), vec!["m1".to_string()]);
    assert!(session.store().conversation("c1").unwrap().last_message.is_some());

    session.clear_conversation("c1").await.unwrap();
    assert!(session.store().messages("c1").is_empty());
    assert!(session.store().conversation("c1").unwrap().last_message.is_none());
}

#[tokio::test]
async fn test_actions_on_unknown_conversation() {
    let (mut session, api, _server, _servers) = started().await;

    assert!(matches!(
        session.toggle_pin("nope").await,
        Err(Error::ConversationNotFound { .. })
    ));
    assert!(session.delete_conversation("nope").await.is_err());
    assert_eq!(api.calls(), vec!["fetch_conversations".to_string()]);
}
