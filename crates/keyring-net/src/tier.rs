//! Tier abstraction
//!
//! A tier is one event/query network. keyringd only ever talks to a tier
//! through [`Tier`]: it subscribes to user events and queries, publishes user
//! events, answers queries, and issues queries of its own.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

use crate::framing::FrameError;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Request timed out")]
    Timeout,
    #[error("Remote error: {0}")]
    Remote(String),
}

/// A user event as carried by the event bus.
///
/// Install events carry key material, so the payload is zeroed on drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserEvent {
    pub name: String,
    pub payload: Zeroizing<Vec<u8>>,
    pub coalesce: bool,
}

impl UserEvent {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>, coalesce: bool) -> Self {
        Self {
            name: name.into(),
            payload: Zeroizing::new(payload.into()),
            coalesce,
        }
    }
}

/// Identifier of an inbound query, used to address the response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryId(pub u64);

impl From<u64> for QueryId {
    fn from(id: u64) -> Self {
        QueryId(id)
    }
}

impl From<i64> for QueryId {
    fn from(id: i64) -> Self {
        QueryId(id as u64)
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound query awaiting a response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    pub id: QueryId,
    pub name: String,
}

/// Parameters of an outbound query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryParams {
    pub name: String,
    pub payload: Vec<u8>,
    /// Ask members to acknowledge receipt
    pub request_ack: bool,
}

impl QueryParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Vec::new(),
            request_ack: false,
        }
    }
}

/// One member's answer to an outbound query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeResponse {
    pub from: String,
    pub payload: Zeroizing<Vec<u8>>,
}

/// Ordered, unbounded stream of user events
pub type EventStream = mpsc::UnboundedReceiver<UserEvent>;
/// Ordered, unbounded stream of inbound queries
pub type QueryStream = mpsc::UnboundedReceiver<QueryRequest>;
/// Responses to one outbound query
pub type ResponseStream = mpsc::UnboundedReceiver<NodeResponse>;

/// One event/query network
#[async_trait]
pub trait Tier: Send + Sync {
    /// Subscribe to user events
    async fn stream_events(&self) -> Result<EventStream, TransportError>;

    /// Subscribe to inbound queries
    async fn stream_queries(&self) -> Result<QueryStream, TransportError>;

    /// Publish a user event
    async fn user_event(&self, event: &UserEvent) -> Result<(), TransportError>;

    /// Answer an inbound query
    async fn respond(
        &self,
        id: QueryId,
        payload: Zeroizing<Vec<u8>>,
    ) -> Result<(), TransportError>;

    /// Issue a query; responses arrive on the returned stream
    async fn query(&self, params: QueryParams) -> Result<ResponseStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_from_signed_and_unsigned() {
        assert_eq!(QueryId::from(42i64), QueryId::from(42u64));
        assert_eq!(QueryId::from(-1i64), QueryId(u64::MAX));
    }

    #[test]
    fn test_event_payload_is_wiped_in_place() {
        use zeroize::Zeroize;

        let event = UserEvent::new("ether:install-key", vec![7; 24], false);
        let mut copy = event.clone();
        copy.payload.zeroize();

        assert!(copy.payload.is_empty());
        assert_eq!(event.payload.len(), 24);
    }

    #[test]
    fn test_query_params_defaults() {
        let params = QueryParams::new("ether:retrieve-keys");
        assert!(!params.request_ack);
        assert!(params.payload.is_empty());
    }
}
