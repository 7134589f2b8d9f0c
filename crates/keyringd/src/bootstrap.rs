//! One-shot keyring bootstrap from the WAN tier
//!
//! The keyring stays exclusively locked from before the query is issued
//! until the response has been adopted, so no reader ever observes a
//! half-seeded keyring and no relayed mutation interleaves with the seed.

use crate::store::{ExclusiveKeyring, Keyring};
use keyring_core::{decode_snapshot, KeyName, MutationDecoder};
use keyring_net::{QueryParams, Tier, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Bootstrap errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Malformed bootstrap response: {0}")]
    Codec(#[from] keyring_core::Error),
    #[error("Bootstrap query failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Bootstrap query ended without a response")]
    NoResponse,
    #[error("Bootstrap response timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of a completed bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Member that answered
    pub from: String,
    /// Keys adopted
    pub key_count: usize,
    /// Default adopted, if it resolved
    pub default: Option<KeyName>,
}

/// Seeds the keyring from a single retrieval query
pub struct Bootstrapper {
    decoder: MutationDecoder,
    tier: Arc<dyn Tier>,
    /// Longest wait for the response; `None` waits indefinitely
    timeout: Option<Duration>,
}

impl Bootstrapper {
    pub fn new(decoder: MutationDecoder, tier: Arc<dyn Tier>, timeout: Option<Duration>) -> Self {
        Self {
            decoder,
            tier,
            timeout,
        }
    }

    /// Lock the keyring and bootstrap it
    pub async fn sync(&self, keyring: &Keyring) -> Result<BootstrapReport, BootstrapError> {
        let hold = keyring.exclusive().await;
        self.run(hold).await
    }

    /// Bootstrap a keyring whose exclusive lock the caller already holds.
    ///
    /// The lock is released when this returns, on success or failure.
    pub async fn run(&self, mut hold: ExclusiveKeyring) -> Result<BootstrapReport, BootstrapError> {
        let query_name = self.decoder.retrieve_query_name();
        let mut responses = self.tier.query(QueryParams::new(query_name.as_str())).await?;
        info!("Query '{}' dispatched", query_name);

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, responses.recv())
                .await
                .map_err(|_| BootstrapError::Timeout(limit))?,
            None => responses.recv().await,
        }
        .ok_or(BootstrapError::NoResponse)?;

        let mut snapshot = decode_snapshot(&response.payload)?;

        let names: Vec<String> = snapshot.key_names().iter().map(KeyName::to_string).collect();
        info!(
            "{} response from '{}': default {}, keys [{}], total keys {}",
            query_name,
            response.from,
            snapshot
                .default
                .map(|name| name.to_string())
                .unwrap_or_default(),
            names.join(", "),
            snapshot.keys.len()
        );

        if let Some(name) = snapshot.drop_unresolved_default() {
            warn!("cannot set default key {}", name);
        }

        hold.replace_all(snapshot);

        Ok(BootstrapReport {
            from: response.from,
            key_count: hold.key_count(),
            default: hold.default_name(),
        })
    }
}
