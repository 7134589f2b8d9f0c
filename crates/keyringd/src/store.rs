//! Shared keyring store
//!
//! Wraps a [`KeySet`] in a reader/writer lock: snapshots run concurrently,
//! every mutation is exclusive. The lock is async so bootstrap can hold it
//! across its query round trip.

use keyring_core::{KeyName, KeySet, Mutation, MutationOutcome, SecretKey, Snapshot};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

/// Handle to the process keyring
#[derive(Clone, Default)]
pub struct Keyring {
    inner: Arc<RwLock<KeySet>>,
}

impl Keyring {
    /// Create an empty keyring
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install(&self, entry: SecretKey) -> MutationOutcome {
        self.inner.write().await.install(entry)
    }

    pub async fn remove(&self, name: &KeyName) -> MutationOutcome {
        self.inner.write().await.remove(name)
    }

    pub async fn set_default(&self, name: &KeyName) -> MutationOutcome {
        self.inner.write().await.set_default(name)
    }

    /// Zero and drop every entry. Returns how many were wiped.
    pub async fn wipe(&self) -> usize {
        self.inner.write().await.wipe()
    }

    pub async fn apply(&self, mutation: Mutation) -> MutationOutcome {
        self.inner.write().await.apply(mutation)
    }

    /// Copy the current contents under a read lock
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.snapshot()
    }

    /// Atomically adopt a snapshot's contents
    pub async fn replace_all(&self, snapshot: Snapshot) {
        self.inner.write().await.replace_all(snapshot)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn default_name(&self) -> Option<KeyName> {
        self.inner.read().await.default_name()
    }

    /// Take the exclusive lock until the returned hold is dropped
    pub async fn exclusive(&self) -> ExclusiveKeyring {
        ExclusiveKeyring {
            guard: self.inner.clone().write_owned().await,
        }
    }
}

/// Exclusive hold on the keyring; no reads or mutations run while it lives
pub struct ExclusiveKeyring {
    guard: OwnedRwLockWriteGuard<KeySet>,
}

impl ExclusiveKeyring {
    pub fn replace_all(&mut self, snapshot: Snapshot) {
        self.guard.replace_all(snapshot)
    }

    /// Number of keys held
    pub fn key_count(&self) -> usize {
        self.guard.len()
    }

    pub fn default_name(&self) -> Option<KeyName> {
        self.guard.default_name()
    }
}
