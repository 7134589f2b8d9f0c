//! Keyring retrieval queries on the LAN tier

use crate::store::Keyring;
use keyring_core::{encode_snapshot, MutationDecoder};
use keyring_net::{QueryRequest, QueryStream, Tier, TransportError};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Responder errors. All of them stop the responder.
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("Snapshot encoding failed: {0}")]
    Codec(#[from] keyring_core::Error),
    #[error("Response failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Query stream closed")]
    StreamClosed,
}

/// Answers keyring retrieval queries with an encoded snapshot
pub struct QueryResponder {
    keyring: Keyring,
    decoder: MutationDecoder,
    tier: Arc<dyn Tier>,
    stats: RwLock<ResponderStats>,
}

impl QueryResponder {
    pub fn new(keyring: Keyring, decoder: MutationDecoder, tier: Arc<dyn Tier>) -> Self {
        Self {
            keyring,
            decoder,
            tier,
            stats: RwLock::new(ResponderStats::default()),
        }
    }

    /// Answer one query if it is a retrieval query. Returns whether it was.
    pub async fn handle_query(&self, query: QueryRequest) -> Result<bool, ResponderError> {
        if !self.decoder.is_retrieve_query(&query.name) {
            debug!("Ignoring query {}", query.name);
            self.stats.write().queries_ignored += 1;
            return Ok(false);
        }

        let snapshot = self.keyring.snapshot().await;
        info!("{}: {} keys", query.name, snapshot.keys.len());

        let payload = encode_snapshot(&snapshot)?;
        self.tier.respond(query.id, payload).await?;

        self.stats.write().queries_answered += 1;
        Ok(true)
    }

    /// Consume the query stream until it closes or a response fails
    pub async fn run(&self, mut queries: QueryStream) -> Result<(), ResponderError> {
        info!("Answering '{}' queries", self.decoder.retrieve_query_name());
        while let Some(query) = queries.recv().await {
            self.handle_query(query).await?;
        }
        Err(ResponderError::StreamClosed)
    }

    pub fn stats(&self) -> ResponderStats {
        self.stats.read().clone()
    }
}

/// Responder statistics
#[derive(Debug, Clone, Default)]
pub struct ResponderStats {
    pub queries_answered: u64,
    pub queries_ignored: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyring_core::{decode_snapshot, KeyName, SecretKey, NAME_LEN};
    use keyring_net::{MemoryTier, QueryId};

    fn responder() -> (QueryResponder, Keyring, Arc<MemoryTier>) {
        let keyring = Keyring::new();
        let lan = Arc::new(MemoryTier::new());
        let responder =
            QueryResponder::new(keyring.clone(), MutationDecoder::new("ether:"), lan.clone());
        (responder, keyring, lan)
    }

    fn query(id: impl Into<QueryId>, name: &str) -> QueryRequest {
        QueryRequest {
            id: id.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_answers_with_snapshot() {
        let (responder, keyring, lan) = responder();
        let k1 = SecretKey::new(vec![1; NAME_LEN + 8]).unwrap();
        keyring.install(k1.clone()).await;
        keyring.set_default(&k1.name()).await;

        assert!(responder
            .handle_query(query(5u64, "ether:retrieve-keys"))
            .await
            .unwrap());

        let responses = lan.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, QueryId(5));

        let snapshot = decode_snapshot(&responses[0].1).unwrap();
        assert_eq!(snapshot.default, Some(KeyName([1; NAME_LEN])));
        assert_eq!(snapshot.keys, vec![k1]);
    }

    #[tokio::test]
    async fn test_empty_keyring_has_empty_default() {
        let (responder, _keyring, lan) = responder();

        responder
            .handle_query(query(-3i64, "ether:retrieve-keys"))
            .await
            .unwrap();

        let (id, payload) = lan.responses().remove(0);
        assert_eq!(id, QueryId(-3i64 as u64));
        let snapshot = decode_snapshot(&payload).unwrap();
        assert_eq!(snapshot.default, None);
        assert!(snapshot.keys.is_empty());
    }

    #[tokio::test]
    async fn test_other_queries_ignored() {
        let (responder, _keyring, lan) = responder();

        assert!(!responder
            .handle_query(query(1u64, "retrieve-keys"))
            .await
            .unwrap());
        assert!(!responder
            .handle_query(query(2u64, "ether:members"))
            .await
            .unwrap());
        assert!(lan.responses().is_empty());
        assert_eq!(responder.stats().queries_ignored, 2);
    }

    #[tokio::test]
    async fn test_run_serves_stream_in_order() {
        let (responder, _keyring, lan) = responder();
        let queries = lan.stream_queries().await.unwrap();

        lan.inject_query(query(1u64, "ether:retrieve-keys"));
        lan.inject_query(query(2u64, "ether:retrieve-keys"));
        lan.close_streams();

        assert!(matches!(
            responder.run(queries).await,
            Err(ResponderError::StreamClosed)
        ));
        let ids: Vec<_> = lan.responses().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![QueryId(1), QueryId(2)]);
    }
}
