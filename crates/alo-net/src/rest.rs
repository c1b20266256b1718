//! REST collaborator: conversation list, history, create, pin, clear, delete.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use alo_core::prelude::*;
use alo_core::protocol::{WireConversation, WireMessage};
use alo_core::{Conversation, ConversationKind, Message};

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Body of `POST /api/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewConversation {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub member_ids: Vec<String>,
}

impl NewConversation {
    pub fn private(peer_id: impl Into<String>) -> Self {
        Self {
            kind: ConversationKind::Private,
            name: None,
            member_ids: vec![peer_id.into()],
        }
    }

    pub fn group(name: impl Into<String>, member_ids: Vec<String>) -> Self {
        Self {
            kind: ConversationKind::Group,
            name: Some(name.into()),
            member_ids,
        }
    }
}

/// Token-authenticated REST operations the sync core consumes.
#[trait_variant::make(ChatApi: Send)]
pub trait LocalChatApi {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>>;

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn create_conversation(&self, request: &NewConversation) -> Result<Conversation>;

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()>;

    async fn clear_messages(&self, conversation_id: &str) -> Result<()>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct ConversationList {
    #[serde(default)]
    conversations: Vec<WireConversation>,
}

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// [`ChatApi`] over HTTP with a bearer token.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `/api/conversations[/<id>][/<tail>]`
    fn conversations_url(&self, id: Option<&str>, tail: Option<&str>) -> String {
        let mut url = format!("{}/api/conversations", self.base_url);
        if let Some(id) = id {
            url.push('/');
            url.extend(utf8_percent_encode(id, PATH_SEGMENT));
        }
        if let Some(tail) = tail {
            url.push('/');
            url.push_str(tail);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), error_detail(status, &body)));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::protocol(format!("unexpected response body: {e}")))
    }
}

/// Extract the server's `detail` message, falling back to the status text.
fn error_detail(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .map(|d| match d {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
    detail.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    })
}

impl ChatApi for RestClient {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        let url = self.conversations_url(None, None);
        debug!("GET {}", url);
        let list: ConversationList = self.send_json(self.http.get(url)).await?;
        Ok(list
            .conversations
            .into_iter()
            .map(WireConversation::into_conversation)
            .collect())
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let url = self.conversations_url(Some(conversation_id), Some("messages"));
        debug!("GET {}", url);
        let list: MessageList = self.send_json(self.http.get(url)).await?;
        Ok(list
            .messages
            .into_iter()
            .map(WireMessage::into_message)
            .collect())
    }

    async fn create_conversation(&self, request: &NewConversation) -> Result<Conversation> {
        let url = self.conversations_url(None, None);
        debug!("POST {}", url);
        let wire: WireConversation = self.send_json(self.http.post(url).json(request)).await?;
        Ok(wire.into_conversation())
    }

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()> {
        let url = self.conversations_url(Some(conversation_id), Some("pin"));
        debug!("PUT {}", url);
        self.send(self.http.put(url).json(&json!({ "is_pinned": pinned })))
            .await?;
        Ok(())
    }

    async fn clear_messages(&self, conversation_id: &str) -> Result<()> {
        let url = self.conversations_url(Some(conversation_id), Some("messages"));
        debug!("DELETE {}", url);
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let url = self.conversations_url(Some(conversation_id), None);
        debug!("DELETE {}", url);
        self.send(self.http.delete(url)).await?;
        Ok(())
    }
}
