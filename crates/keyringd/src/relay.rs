//! Relay of key lifecycle events from the WAN tier to the LAN tier

use crate::store::Keyring;
use keyring_core::{Decoded, MutationDecoder, MutationKind, MutationOutcome};
use keyring_net::{EventStream, Tier, TransportError, UserEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Relay errors. All of them stop the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] keyring_core::Error),
    #[error("Relay failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Event stream closed")]
    StreamClosed,
}

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    /// Not a keyring event; neither relayed nor applied
    Ignored,
    /// Relayed, but not a mutation this relay applies
    Relayed,
    /// Relayed and applied locally
    Applied {
        kind: MutationKind,
        outcome: MutationOutcome,
    },
}

/// Event relay
pub struct EventRelay {
    keyring: Keyring,
    decoder: MutationDecoder,
    /// Tier that receives relayed events
    outbound: Arc<dyn Tier>,
    stats: RwLock<RelayStats>,
}

impl EventRelay {
    pub fn new(keyring: Keyring, decoder: MutationDecoder, outbound: Arc<dyn Tier>) -> Self {
        Self {
            keyring,
            decoder,
            outbound,
            stats: RwLock::new(RelayStats::default()),
        }
    }

    /// Validate, relay and apply one event.
    ///
    /// Every well-formed prefixed event is relayed unmodified, whatever the
    /// local outcome: the other tier's keyring is fed only by this relay.
    pub async fn handle_event(&self, event: UserEvent) -> Result<RelayAction, RelayError> {
        self.stats.write().events_received += 1;

        let decoded = self.decoder.decode(&event.name, &event.payload)?;
        if !decoded.should_relay() {
            self.stats.write().events_ignored += 1;
            return Ok(RelayAction::Ignored);
        }

        self.outbound.user_event(&event).await?;
        self.stats.write().events_relayed += 1;

        let Decoded::Mutation(mutation) = decoded else {
            debug!("Relayed unrecognised event {}", event.name);
            return Ok(RelayAction::Relayed);
        };

        let kind = mutation.kind();
        let key = mutation.key_name();
        match key {
            Some(name) => info!("{} {}", event.name, name),
            None => info!("{}", event.name),
        }

        let outcome = self.keyring.apply(mutation).await;

        let mut stats = self.stats.write();
        if outcome.is_miss() {
            stats.mutations_missed += 1;
            if let Some(name) = key {
                match kind {
                    MutationKind::InstallKey => warn!("already have key {}", name),
                    MutationKind::RemoveKey => warn!("cannot remove key {}", name),
                    MutationKind::SetDefaultKey => warn!("cannot set default key {}", name),
                    MutationKind::WipeKeys => {}
                }
            }
        } else {
            stats.mutations_applied += 1;
        }

        Ok(RelayAction::Applied { kind, outcome })
    }

    /// Consume the event stream until it closes or an event is fatal
    pub async fn run(&self, mut events: EventStream) -> Result<(), RelayError> {
        info!("Relaying '{}' events", self.decoder.prefix());
        while let Some(event) = events.recv().await {
            self.handle_event(event).await?;
        }
        Err(RelayError::StreamClosed)
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.read().clone()
    }
}

/// Relay statistics
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub events_received: u64,
    pub events_relayed: u64,
    pub events_ignored: u64,
    pub mutations_applied: u64,
    pub mutations_missed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyring_core::{KeyName, NAME_LEN};
    use keyring_net::MemoryTier;

    fn relay() -> (EventRelay, Keyring, Arc<MemoryTier>) {
        let keyring = Keyring::new();
        let lan = Arc::new(MemoryTier::new());
        let relay = EventRelay::new(keyring.clone(), MutationDecoder::new("ether:"), lan.clone());
        (relay, keyring, lan)
    }

    fn install(name: u8) -> UserEvent {
        let mut payload = vec![name; NAME_LEN];
        payload.extend_from_slice(&[0xEE; 8]);
        UserEvent::new("ether:install-key", payload, false)
    }

    #[tokio::test]
    async fn test_install_relayed_and_applied() {
        let (relay, keyring, lan) = relay();

        let event = install(1);
        let action = relay.handle_event(event.clone()).await.unwrap();
        assert_eq!(
            action,
            RelayAction::Applied {
                kind: MutationKind::InstallKey,
                outcome: MutationOutcome::Applied,
            }
        );

        assert_eq!(lan.published(), vec![event]);
        assert_eq!(keyring.len().await, 1);
    }

    #[tokio::test]
    async fn test_misses_still_relayed() {
        let (relay, keyring, lan) = relay();

        relay.handle_event(install(1)).await.unwrap();
        let action = relay.handle_event(install(1)).await.unwrap();
        assert_eq!(
            action,
            RelayAction::Applied {
                kind: MutationKind::InstallKey,
                outcome: MutationOutcome::AlreadyPresent,
            }
        );

        let remove = UserEvent::new("ether:remove-key", vec![9; NAME_LEN], true);
        relay.handle_event(remove.clone()).await.unwrap();

        let published = lan.published();
        assert_eq!(published.len(), 3);
        assert_eq!(published[2], remove);
        assert!(published[2].coalesce);
        assert_eq!(keyring.len().await, 1);

        let stats = relay.stats();
        assert_eq!(stats.events_relayed, 3);
        assert_eq!(stats.mutations_applied, 1);
        assert_eq!(stats.mutations_missed, 2);
    }

    #[tokio::test]
    async fn test_foreign_events_ignored() {
        let (relay, _keyring, lan) = relay();

        let action = relay
            .handle_event(UserEvent::new("deploy", b"v2".to_vec(), false))
            .await
            .unwrap();
        assert_eq!(action, RelayAction::Ignored);
        assert!(lan.published().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognised_prefixed_events_relayed() {
        let (relay, keyring, lan) = relay();

        let event = UserEvent::new("ether:rotate-keys", vec![1, 2, 3], false);
        assert_eq!(
            relay.handle_event(event.clone()).await.unwrap(),
            RelayAction::Relayed
        );
        assert_eq!(lan.published(), vec![event]);
        assert!(keyring.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_event_is_fatal_and_not_relayed() {
        let (relay, keyring, lan) = relay();

        let result = relay
            .handle_event(UserEvent::new("ether:remove-key", vec![1; 4], false))
            .await;
        assert!(matches!(result, Err(RelayError::Malformed(_))));
        assert!(lan.published().is_empty());
        assert!(keyring.is_empty().await);
    }

    #[tokio::test]
    async fn test_default_lifecycle() {
        let (relay, keyring, _lan) = relay();

        relay.handle_event(install(1)).await.unwrap();
        relay.handle_event(install(2)).await.unwrap();
        relay
            .handle_event(UserEvent::new("ether:set-default-key", vec![1; NAME_LEN], false))
            .await
            .unwrap();
        assert_eq!(keyring.default_name().await, Some(KeyName([1; NAME_LEN])));

        relay
            .handle_event(UserEvent::new("ether:remove-key", vec![1; NAME_LEN], false))
            .await
            .unwrap();
        let snapshot = keyring.snapshot().await;
        assert_eq!(snapshot.default, None);
        assert_eq!(snapshot.key_names(), vec![KeyName([2; NAME_LEN])]);

        relay
            .handle_event(UserEvent::new("ether:wipe-keys", vec![], false))
            .await
            .unwrap();
        assert!(keyring.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_stops_on_malformed_event() {
        let (relay, keyring, lan) = relay();
        let wan = MemoryTier::new();
        let events = wan.stream_events().await.unwrap();

        wan.inject_event(install(1));
        wan.inject_event(UserEvent::new("ether:install-key", vec![1; NAME_LEN], false));
        wan.inject_event(install(2));

        let result = relay.run(events).await;
        assert!(matches!(result, Err(RelayError::Malformed(_))));
        assert_eq!(lan.published().len(), 1);
        assert_eq!(keyring.len().await, 1);
    }

    #[tokio::test]
    async fn test_run_reports_closed_stream() {
        let (relay, _keyring, _lan) = relay();
        let wan = MemoryTier::new();
        let events = wan.stream_events().await.unwrap();

        wan.inject_event(install(1));
        wan.close_streams();

        assert!(matches!(relay.run(events).await, Err(RelayError::StreamClosed)));
        assert_eq!(relay.stats().events_relayed, 1);
    }
}
