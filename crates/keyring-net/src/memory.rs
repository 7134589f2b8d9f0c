//! In-process tier
//!
//! Delivers injected events and queries to subscribers and records everything
//! published, answered and queried. Used to drive keyringd without an agent.

use crate::tier::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

#[derive(Default)]
struct MemoryState {
    event_subs: Vec<mpsc::UnboundedSender<UserEvent>>,
    query_subs: Vec<mpsc::UnboundedSender<QueryRequest>>,
    open_queries: Vec<mpsc::UnboundedSender<NodeResponse>>,
    published: Vec<UserEvent>,
    responses: Vec<(QueryId, Zeroizing<Vec<u8>>)>,
    queries: Vec<QueryParams>,
}

/// In-memory [`Tier`]
#[derive(Default)]
pub struct MemoryTier {
    state: Mutex<MemoryState>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every subscriber. Returns how many received it.
    pub fn inject_event(&self, event: UserEvent) -> usize {
        let mut state = self.state.lock();
        state.event_subs.retain(|tx| tx.send(event.clone()).is_ok());
        state.event_subs.len()
    }

    /// Deliver a query to every subscriber. Returns how many received it.
    pub fn inject_query(&self, query: QueryRequest) -> usize {
        let mut state = self.state.lock();
        state.query_subs.retain(|tx| tx.send(query.clone()).is_ok());
        state.query_subs.len()
    }

    /// Answer every outstanding outbound query
    pub fn answer_queries(&self, response: NodeResponse) -> usize {
        let mut state = self.state.lock();
        state
            .open_queries
            .retain(|tx| tx.send(response.clone()).is_ok());
        state.open_queries.len()
    }

    /// End every outstanding outbound query
    pub fn finish_queries(&self) {
        self.state.lock().open_queries.clear();
    }

    /// End every event and query subscription
    pub fn close_streams(&self) {
        let mut state = self.state.lock();
        state.event_subs.clear();
        state.query_subs.clear();
    }

    /// Events published through this tier, in order
    pub fn published(&self) -> Vec<UserEvent> {
        self.state.lock().published.clone()
    }

    /// Responses sent to inbound queries, in order
    pub fn responses(&self) -> Vec<(QueryId, Zeroizing<Vec<u8>>)> {
        self.state.lock().responses.clone()
    }

    /// Outbound queries issued through this tier, in order
    pub fn queries(&self) -> Vec<QueryParams> {
        self.state.lock().queries.clone()
    }
}

#[async_trait]
impl Tier for MemoryTier {
    async fn stream_events(&self) -> Result<EventStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().event_subs.push(tx);
        Ok(rx)
    }

    async fn stream_queries(&self) -> Result<QueryStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().query_subs.push(tx);
        Ok(rx)
    }

    async fn user_event(&self, event: &UserEvent) -> Result<(), TransportError> {
        self.state.lock().published.push(event.clone());
        Ok(())
    }

    async fn respond(
        &self,
        id: QueryId,
        payload: Zeroizing<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.state.lock().responses.push((id, payload));
        Ok(())
    }

    async fn query(&self, params: QueryParams) -> Result<ResponseStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.queries.push(params);
        state.open_queries.push(tx);
        Ok(rx)
    }
}
