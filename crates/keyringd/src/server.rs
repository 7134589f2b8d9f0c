//! keyringd server - composition root and main service loop

use crate::bootstrap::{BootstrapError, Bootstrapper};
use crate::config::Config;
use crate::relay::{EventRelay, RelayError, RelayStats};
use crate::responder::{QueryResponder, ResponderError, ResponderStats};
use crate::store::Keyring;
use keyring_core::MutationDecoder;
use keyring_net::{RpcTier, Tier, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("Relay stopped: {0}")]
    Relay(#[from] RelayError),
    #[error("Responder stopped: {0}")]
    Responder(#[from] ResponderError),
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Server state
pub struct Server {
    keyring: Keyring,
    /// Source of mutations and of the bootstrap snapshot
    wan: Arc<dyn Tier>,
    /// Receives relayed mutations; queries are answered here
    lan: Arc<dyn Tier>,
    relay: Arc<EventRelay>,
    responder: Arc<QueryResponder>,
    bootstrapper: Bootstrapper,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a server over two connected tiers
    pub fn new(
        wan: Arc<dyn Tier>,
        lan: Arc<dyn Tier>,
        prefix: &str,
        bootstrap_timeout: Option<Duration>,
    ) -> Self {
        let keyring = Keyring::new();
        let decoder = MutationDecoder::new(prefix);

        let relay = Arc::new(EventRelay::new(
            keyring.clone(),
            decoder.clone(),
            lan.clone(),
        ));
        let responder = Arc::new(QueryResponder::new(
            keyring.clone(),
            decoder.clone(),
            lan.clone(),
        ));
        let bootstrapper = Bootstrapper::new(decoder, wan.clone(), bootstrap_timeout);

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            keyring,
            wan,
            lan,
            relay,
            responder,
            bootstrapper,
            shutdown_tx,
        }
    }

    /// Connect to both tier agents and create a server
    pub async fn connect(config: &Config) -> Result<Self, ServerError> {
        let wan_config = config.wan();
        let lan_config = config.lan();

        let wan = RpcTier::connect("wan", &wan_config).await?;
        let lan = RpcTier::connect("lan", &lan_config).await?;

        Ok(Self::new(
            Arc::new(wan),
            Arc::new(lan),
            &config.prefix,
            wan_config.timeout,
        ))
    }

    /// The keyring this server maintains
    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// Run the server.
    ///
    /// Returns `Ok` on shutdown and an error as soon as bootstrap, the relay
    /// or the responder fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // Subscribe before bootstrap so nothing published meanwhile is lost
        let queries = self.lan.stream_queries().await?;
        let events = self.wan.stream_events().await?;

        // Held before the consumers start, so they queue behind bootstrap
        let hold = self.keyring.exclusive().await;

        let mut relay_task = {
            let relay = self.relay.clone();
            tokio::spawn(async move { relay.run(events).await })
        };
        let mut responder_task = {
            let responder = self.responder.clone();
            tokio::spawn(async move { responder.run(queries).await })
        };

        let bootstrap = tokio::select! {
            result = self.bootstrapper.run(hold) => Some(result),
            _ = shutdown_rx.recv() => None,
        };

        let result = match bootstrap {
            None => {
                info!("Shutdown during bootstrap");
                Ok(())
            }
            Some(Err(e)) => Err(e.into()),
            Some(Ok(report)) => {
                info!(
                    "Keyring ready: {} keys from '{}' (default: {})",
                    report.key_count,
                    report.from,
                    report
                        .default
                        .map(|name| name.to_string())
                        .unwrap_or_else(|| "none".into())
                );

                tokio::select! {
                    result = &mut relay_task => result.map_err(ServerError::from)
                        .and_then(|r| r.map_err(ServerError::from)),
                    result = &mut responder_task => result.map_err(ServerError::from)
                        .and_then(|r| r.map_err(ServerError::from)),
                    _ = shutdown_rx.recv() => {
                        info!("Shutting down...");
                        Ok(())
                    }
                }
            }
        };

        relay_task.abort();
        responder_task.abort();

        let stats = self.stats();
        info!(
            "Final stats: {} events relayed, {} mutations applied ({} missed), {} queries answered",
            stats.relay.events_relayed,
            stats.relay.mutations_applied,
            stats.relay.mutations_missed,
            stats.responder.queries_answered
        );

        if let Err(e) = &result {
            error!("Stopping: {}", e);
        }
        result
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            relay: self.relay.stats(),
            responder: self.responder.stats(),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub relay: RelayStats,
    pub responder: ResponderStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyring_core::{decode_snapshot, encode_snapshot, KeyName, SecretKey, Snapshot, NAME_LEN};
    use keyring_net::{MemoryTier, NodeResponse, QueryId, QueryRequest, UserEvent};

    fn entry(name: u8) -> SecretKey {
        SecretKey::new(vec![name; NAME_LEN + 8]).unwrap()
    }

    fn install(name: u8) -> UserEvent {
        UserEvent::new("ether:install-key", entry(name).as_bytes().to_vec(), false)
    }

    fn retrieve(id: u64) -> QueryRequest {
        QueryRequest {
            id: QueryId(id),
            name: "ether:retrieve-keys".into(),
        }
    }

    fn setup() -> (Arc<Server>, Arc<MemoryTier>, Arc<MemoryTier>) {
        let wan = Arc::new(MemoryTier::new());
        let lan = Arc::new(MemoryTier::new());
        let server = Arc::new(Server::new(wan.clone(), lan.clone(), "ether:", None));
        (server, wan, lan)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_bootstrap_then_relay_and_serve() {
        let (server, wan, lan) = setup();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        wait_for(|| !wan.queries().is_empty()).await;

        // events arriving mid-bootstrap are relayed but applied afterwards
        wan.inject_event(install(3));
        lan.inject_query(retrieve(1));

        let seed = Snapshot::new(Some(KeyName([1; NAME_LEN])), vec![entry(1), entry(2)]);
        wan.answer_queries(NodeResponse {
            from: "wan-1".into(),
            payload: encode_snapshot(&seed).unwrap(),
        });

        wait_for(|| !lan.responses().is_empty()).await;
        wait_for(|| server.stats().relay.mutations_applied == 1).await;

        let snapshot = server.keyring().snapshot().await;
        assert_eq!(snapshot.default, Some(KeyName([1; NAME_LEN])));
        assert_eq!(snapshot.keys.len(), 3);
        assert_eq!(lan.published(), vec![install(3)]);

        // the query queued behind bootstrap saw at least the seeded keyring
        let (id, payload) = lan.responses().remove(0);
        assert_eq!(id, QueryId(1));
        let served = decode_snapshot(&payload).unwrap();
        assert!(served.keys.len() >= 2);
        assert_eq!(served.default, Some(KeyName([1; NAME_LEN])));

        server.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_event_stops_server() {
        let (server, wan, lan) = setup();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        wait_for(|| !wan.queries().is_empty()).await;
        wan.answer_queries(NodeResponse {
            from: "wan-1".into(),
            payload: encode_snapshot(&Snapshot::default()).unwrap(),
        });

        wan.inject_event(UserEvent::new("ether:set-default-key", vec![1; 3], false));

        let result = running.await.unwrap();
        assert!(matches!(
            result,
            Err(ServerError::Relay(RelayError::Malformed(_)))
        ));
        assert!(lan.published().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_failure_stops_server() {
        let (server, wan, _lan) = setup();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        wait_for(|| !wan.queries().is_empty()).await;
        wan.finish_queries();

        assert!(matches!(
            running.await.unwrap(),
            Err(ServerError::Bootstrap(BootstrapError::NoResponse))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_during_bootstrap() {
        let (server, wan, _lan) = setup();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        wait_for(|| !wan.queries().is_empty()).await;
        server.shutdown();

        running.await.unwrap().unwrap();
        assert!(server.keyring().is_empty().await);
    }
}
