//! # alo-net - Transport and REST
//!
//! Owns everything that touches the network:
//!
//! - [`ConnectionManager`] - the session's WebSocket link, outbound queue,
//!   heartbeat, and reconnect loop
//! - [`ReconnectPolicy`] - exponential backoff with jitter and a retry ceiling
//! - [`Connector`] / [`Transport`] - the seam between the manager and the
//!   socket ([`WsConnector`] in production)
//! - [`ChatApi`] / [`RestClient`] - the REST collaborator
//!
//! Fakes for both seams live in `test_utils` behind the `test-helpers`
//! feature.

pub mod backoff;
pub mod connection;
pub mod rest;
pub mod transport;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use backoff::ReconnectPolicy;
pub use connection::{connection_url, ConnectionManager, ConnectionSettings, ConnectionState};
pub use rest::{ChatApi, LocalChatApi, NewConversation, RestClient};
pub use transport::{
    Connector, LocalConnector, LocalTransport, Transport, TransportFrame, WsConnector, WsLink,
};
